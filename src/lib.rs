/*!
sitewatch - a self-hosted service monitor.

Periodically probes a declared set of network services and local
resources, keeps per-check pass/fail state with retry and threshold
hysteresis, propagates soft-fail dependencies, and dispatches
notifications on state transitions. The whole site, configuration and
runtime state included, persists as one JSON document.
*/

pub mod cli;
pub mod config;
pub mod core;
pub mod site;
