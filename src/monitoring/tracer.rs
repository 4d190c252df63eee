/*!
 * Syscall Tracing
 * Structured spans for socket syscalls and manager operations
 *
 * Every syscall gets a span carrying a UUID trace id, the acting pid and the
 * descriptor it touched. Slow calls are reported on drop; blocking calls
 * (accept, connect, read on an empty queue) routinely trip the threshold.
 */

use crate::core::errors::Errno;
use crate::core::limits::{SLOW_OPERATION_THRESHOLD, SLOW_SYSCALL_THRESHOLD};
use crate::core::types::{Fd, Pid, SysReturn};
use std::time::Instant;
use tracing::{debug, info, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Install the global subscriber
///
/// Environment variables:
/// - RUST_LOG: log level filter (default: info)
/// - KERNEL_TRACE_JSON: JSON output when "1" or "true"
///
/// Safe to call more than once; later calls leave the first subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("KERNEL_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Socket layer tracing initialized");
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one socket syscall
pub struct SyscallSpan {
    span: Span,
    start: Instant,
    syscall: &'static str,
    trace_id: String,
}

impl SyscallSpan {
    pub fn new(syscall: &'static str, pid: Pid) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "syscall",
            trace_id = %trace_id,
            syscall = syscall,
            pid = pid,
            fd = tracing::field::Empty,
            result = tracing::field::Empty,
            errno = tracing::field::Empty,
            error = tracing::field::Empty,
            return_value = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        span.in_scope(|| debug!(syscall, pid, "syscall started"));

        Self {
            span,
            start: Instant::now(),
            syscall,
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_fd(&self, fd: Fd) {
        self.span.record("fd", fd);
    }

    /// Record the raw return value, classifying negative values as errno
    pub fn record_return(&self, value: SysReturn) {
        self.span.record("return_value", value);
        if value < 0 {
            self.span.record("result", "error");
            self.span.record("errno", -value);
        } else {
            self.span.record("result", "success");
        }
    }

    pub fn record_error(&self, errno: Errno, error: &str) {
        self.span.record("result", "error");
        self.span.record("errno", errno.code());
        self.span.record("error", error);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for SyscallSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration > SLOW_SYSCALL_THRESHOLD {
            warn!(
                trace_id = %self.trace_id,
                syscall = self.syscall,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow syscall detected"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                syscall = self.syscall,
                duration_us = duration.as_micros() as u64,
                "syscall completed"
            );
        }
    }
}

/// Span for manager-level operations (init, process cleanup)
pub struct OperationSpan {
    span: Span,
    start: Instant,
    operation: &'static str,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = span!(
            Level::DEBUG,
            "operation",
            trace_id = %generate_trace_id(),
            operation = operation,
            pid = tracing::field::Empty,
            closed_count = tracing::field::Empty,
            result = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    pub fn record(&self, key: &str, value: &str) {
        self.span.record(key, value);
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        if duration > SLOW_OPERATION_THRESHOLD {
            let _entered = self.span.enter();
            warn!(
                operation = self.operation,
                duration_ms = duration.as_millis() as u64,
                "slow operation detected"
            );
        }
    }
}

#[inline]
pub fn span_syscall(name: &'static str, pid: Pid) -> SyscallSpan {
    SyscallSpan::new(name, pid)
}

#[inline]
pub fn span_operation(name: &'static str) -> OperationSpan {
    OperationSpan::new(name)
}
