//! Client metrics
//!
//! - `studio_generate_attempts_total` (counter): label `outcome`
//!   (`success`, `cancelled`, or the error class label)
//! - `studio_key_rotations_total` (counter)
//! - `studio_generate_total` (counter): label `result`
//!   (`success` or a `GenerateError` kind)
//!
//! Without an installed recorder these are no-ops.

/// Record one upstream attempt and how it ended.
pub fn record_attempt(outcome: &str) {
    metrics::counter!("studio_generate_attempts_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a cursor move after a credential-class failure.
pub fn record_rotation() {
    metrics::counter!("studio_key_rotations_total").increment(1);
}

/// Record the final outcome of a generate call.
pub fn record_result(result: &str) {
    metrics::counter!("studio_generate_total", "result" => result.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_attempt("success");
        record_rotation();
        record_result("cancelled");
    }

    /// Recorder/handle pair local to one test; the global recorder can only
    /// be installed once per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn attempts_carry_outcome_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_attempt("invalid_key");
        record_attempt("success");

        let output = handle.render();
        assert!(output.contains("studio_generate_attempts_total"));
        assert!(output.contains("outcome=\"invalid_key\""));
        assert!(output.contains("outcome=\"success\""));
    }

    #[test]
    fn rotations_and_results_are_counted() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_rotation();
        record_rotation();
        record_result("credentials_exhausted");

        let output = handle.render();
        assert!(output.contains("studio_key_rotations_total 2"), "got: {output}");
        assert!(output.contains("result=\"credentials_exhausted\""));
    }
}
