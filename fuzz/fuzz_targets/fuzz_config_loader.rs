#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    match toml::from_str::<dropctl_config::Config>(data) {
        Ok(cfg) => {
            let _ = cfg.validate();
        }
        Err(_e) => {}
    }
});
