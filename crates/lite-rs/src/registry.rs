//! Link-time backend registration.
//!
//! Backend crates add a registrar to [`BACKEND_REGISTRARS`]; the registrar
//! installs device constructors and kernels. Registrars run once, the first
//! time a device or the predictor asks for them.

use std::sync::Once;

#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn()] = [..];

static RUN_REGISTRARS: Once = Once::new();

/// Runs every linked backend registrar exactly once.
pub fn ensure_backends_registered() {
    RUN_REGISTRARS.call_once(|| {
        for registrar in BACKEND_REGISTRARS {
            registrar();
        }
        log::debug!("ran {} backend registrar(s)", BACKEND_REGISTRARS.len());
    });
}
