//! Capture capability gate
//!
//! A call may only start once the microphone is known to be usable.

use crate::audio::AudioBackend;
use crate::config::PcmFormat;

/// Check that `backend` can capture in `format`.
///
/// Denial is an expected outcome (no permission, busy device, no device)
/// and is reported as `false`, never as an error.
pub fn check_capture_permission<B: AudioBackend>(backend: &B, format: &PcmFormat) -> bool {
    debug_assert!(
        format.validate().is_ok(),
        "capture format must be validated before probing: {:?}",
        format
    );

    let granted = backend.probe_capture(format);
    if granted {
        tracing::debug!(
            "Microphone available ({} Hz, {} ch, {}-bit)",
            format.sample_rate,
            format.channels,
            format.encoding.bit_depth()
        );
    } else {
        tracing::warn!("Microphone unavailable: capture permission denied or device busy");
    }
    granted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryBackend;

    #[test]
    fn test_gate_reports_backend_probe() {
        let backend = MemoryBackend::new();
        assert!(check_capture_permission(&backend, &PcmFormat::default()));

        backend.deny_capture();
        assert!(!check_capture_permission(&backend, &PcmFormat::default()));
        assert_eq!(backend.probe_count(), 2);
    }
}
