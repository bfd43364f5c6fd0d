pub mod config;
pub mod logging;

pub mod adb;
pub mod apk;
pub mod apps;
pub mod cache;
pub mod disk;
pub mod download;
pub mod fetch;
pub mod fingerprint;
pub mod install;
pub mod installed;
pub mod kv;
pub mod pipeline;
pub mod release;
