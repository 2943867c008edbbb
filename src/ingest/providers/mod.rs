pub mod cisa_advisories;
pub mod cisa_kev;
pub mod coingecko;
pub mod donki_flares;
pub mod ethereum;
pub mod feodo;
pub mod mempool;
pub mod opensky;
pub mod ransomware;
pub mod statuspage;
pub mod swpc_alerts;
pub mod swpc_kp;
pub mod threatfox;
pub mod urlhaus;
