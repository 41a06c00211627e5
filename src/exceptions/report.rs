//! Default fault reporter.

use tracing::{debug, error};

use super::Reporter;
use crate::fault::Fault;

/// Sends every reported fault to `tracing`.
///
/// Client faults (4xx) are expected traffic and go out at `debug`; everything
/// else is an `error`. A wrapped fault is judged by the fault it wraps.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, fault: &Fault) {
        let status = fault.unwrapped().status();
        let location = fault.unwrapped().location().map(ToString::to_string);
        let code = status.map(|s| s.as_u16());

        if status.is_some_and(|s| s.is_client_error()) {
            debug!(fault = %fault, kind = fault.unwrapped().type_name(), status = code, location = location.as_deref(), "client fault");
        } else {
            error!(fault = %fault, kind = fault.unwrapped().type_name(), status = code, location = location.as_deref(), "unhandled fault");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::fault::HttpFault;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logged(fault: &Fault) -> String {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(out.clone())
            .finish();
        with_default(subscriber, || TracingReporter.report(fault));
        String::from_utf8(out.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn wrapped_client_fault_is_logged_at_debug() {
        let fault = Fault::wrap("bootstrapper `config` failed", HttpFault::new(http::StatusCode::FORBIDDEN, "no"));
        let line = logged(&fault);
        assert!(line.contains("DEBUG"), "{line}");
        assert!(line.contains("client fault"), "{line}");
        assert!(line.contains("status=403"), "{line}");
    }

    #[test]
    fn generic_fault_is_logged_as_error() {
        let line = logged(&Fault::msg("disk on fire"));
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains("unhandled fault"), "{line}");
    }
}
