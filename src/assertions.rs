//! Assertion helpers that fail with the caller's file and line.
//!
//! ```ignore
//! assert_logs_contain!(scope.sink(), LogPartition::Message, "acquireToken");
//! call_and_wait!(scope.bridge(), &main, |signal| {
//!     client.acquire_token(move |result| {
//!         *slot.lock().unwrap() = Some(result);
//!         signal.fire();
//!     });
//! });
//! ```

/// Fails unless `text` occurs in the given partition of `sink`.
#[macro_export]
macro_rules! assert_logs_contain {
    ($sink:expr, $partition:expr, $text:expr) => {{
        let sink: &$crate::log_sink::LogSink = &$sink;
        let partition: $crate::log_sink::LogPartition = $partition;
        let needle = $text;
        let text: &str = ::std::convert::AsRef::<str>::as_ref(&needle);
        if !sink.contains(partition, text) {
            panic!(
                "{}:{}: {:?} logs do not contain \"{}\"\nLogs:\n{}",
                file!(),
                line!(),
                partition,
                text,
                sink.partition_text(partition)
            );
        }
    }};
}

/// Fails if `text` occurs in the given partition of `sink`.
#[macro_export]
macro_rules! assert_logs_do_not_contain {
    ($sink:expr, $partition:expr, $text:expr) => {{
        let sink: &$crate::log_sink::LogSink = &$sink;
        let partition: $crate::log_sink::LogPartition = $partition;
        let needle = $text;
        let text: &str = ::std::convert::AsRef::<str>::as_ref(&needle);
        let count = sink.query(partition, text);
        if count > 0 {
            panic!(
                "{}:{}: {:?} logs contain \"{}\" {} time(s)\nLogs:\n{}",
                file!(),
                line!(),
                partition,
                text,
                count,
                sink.partition_text(partition)
            );
        }
    }};
}

/// String equality that names the expression being checked.
#[macro_export]
macro_rules! assert_string_equals {
    ($actual:expr, $expected:expr) => {{
        let actual: Option<&str> = $actual.map(|s| ::std::convert::AsRef::<str>::as_ref(s));
        let expected: &str = $expected;
        if actual != Some(expected) {
            panic!(
                "{}:{}: `{}` is {:?}, expected \"{}\"",
                file!(),
                line!(),
                stringify!($actual),
                actual,
                expected
            );
        }
    }};
}

/// Equality for timestamps by ordering rather than representation.
#[macro_export]
macro_rules! assert_date_equals {
    ($actual:expr, $expected:expr) => {{
        let (actual, expected) = (&$actual, &$expected);
        if ::std::cmp::PartialOrd::partial_cmp(actual, expected)
            != Some(::std::cmp::Ordering::Equal)
        {
            panic!(
                "{}:{}: `{}` is {:?}, expected {:?}",
                file!(),
                line!(),
                stringify!($actual),
                actual,
                expected
            );
        }
    }};
}

/// Bridges `body` onto `context` and fails at the call site on timeout.
/// Uses the bridge's default timeout unless one is given.
#[macro_export]
macro_rules! call_and_wait {
    ($bridge:expr, $context:expr, $body:expr) => {{
        let bridge: &$crate::bridge::AsyncBridge = &$bridge;
        $crate::call_and_wait!(bridge, $context, $body, bridge.default_timeout())
    }};
    ($bridge:expr, $context:expr, $body:expr, $timeout:expr) => {{
        let bridge: &$crate::bridge::AsyncBridge = &$bridge;
        let context: &$crate::context::ExecutionContext = $context;
        let timeout: ::std::time::Duration = $timeout;
        if !bridge.run_and_wait(context, $body, timeout) {
            panic!(
                "{}:{}: timed out after {:?} waiting for completion on context '{}'",
                file!(),
                line!(),
                timeout,
                context.name()
            );
        }
    }};
}
