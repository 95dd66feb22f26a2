//! Cancellation integration tests for nexus-mcp-gateway.
// crates/nexus-mcp-gateway/tests/cancellation.rs
// =============================================================================
// Module: Cancellation Tests
// Description: Client cancels and session-close cleanup.
// Purpose: Ensure every started operation is canceled exactly once and no
//          message follows a cancellation.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::time::Duration;

use nexus_mcp_core::AuditEventKind;
use nexus_mcp_core::OperationStatus;
use serde_json::json;

use crate::common::Script;
use crate::common::ScriptedRuntime;
use crate::common::call;
use crate::common::cancel;
use crate::common::connect;
use crate::common::harness;
use crate::common::settings;
use crate::common::wait_until;

type TestResult = Result<(), String>;

/// Pending for a few polls, then a completion the runtime keeps reporting
/// even after a cancel.
fn late_completion_script() -> Script {
    let mut script = vec![Ok(OperationStatus::Pending); 3];
    script.push(Ok(OperationStatus::Completed(json!(7))));
    script
}

// ============================================================================
// SECTION: Session Close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn close_cancels_started_operation_once() -> TestResult {
    let harness = harness(ScriptedRuntime::default(), settings(20, true));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(1), "calculator/wait", json!({}))).await;
    let runtime = harness.runtime.clone();
    wait_until(|| runtime.poll_count() > 0).await;

    let rest = client.close().await;
    let unexpected: Vec<_> = rest.iter().filter(|message| message.id.is_some()).collect();
    if !unexpected.is_empty() {
        return Err(format!("no response expected after close: {unexpected:?}"));
    }
    if harness.runtime.cancel_count() != 1 {
        return Err(format!("expected one cancel, got {}", harness.runtime.cancel_count()));
    }
    let kinds = harness.audit.kinds();
    if kinds.iter().filter(|kind| **kind == AuditEventKind::CancelIssued).count() != 1 {
        return Err(format!("expected one cancel audit: {kinds:?}"));
    }
    if kinds.last() != Some(&AuditEventKind::SessionClosed) {
        return Err("session close must be audited last".to_string());
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_before_start_ack_still_cancels_once() -> TestResult {
    let harness = harness(ScriptedRuntime::default(), settings(20, false));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(1), "calculator/wait", json!({}))).await;
    client.close().await;
    if harness.runtime.start_count() != 1 || harness.runtime.cancel_count() != 1 {
        return Err(format!(
            "expected one start and one cancel, got {} and {}",
            harness.runtime.start_count(),
            harness.runtime.cancel_count()
        ));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_skips_terminal_invocations() -> TestResult {
    let runtime = ScriptedRuntime::default().script("add", vec![Ok(OperationStatus::Completed(json!(5)))]);
    let harness = harness(runtime, settings(20, false));
    let mut client = connect(&harness.gateway);
    client.request(call(json!(1), "calculator/add", json!({ "a": 2, "b": 3 }))).await;
    client.close().await;
    if harness.runtime.cancel_count() != 0 {
        return Err("completed operations must not be canceled".to_string());
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_ignores_completion_reported_after_cancel() -> TestResult {
    let runtime = ScriptedRuntime::default().with_late_completion().script("slow", late_completion_script());
    let harness = harness(runtime, settings(20, true));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(1), "calculator/slow", json!({}))).await;
    let runtime = harness.runtime.clone();
    wait_until(|| runtime.poll_count() > 0).await;

    let rest = client.close().await;
    let unexpected: Vec<_> = rest.iter().filter(|message| message.id.is_some()).collect();
    if !unexpected.is_empty() {
        return Err(format!("no response expected after close: {unexpected:?}"));
    }
    if harness.runtime.cancel_count() != 1 {
        return Err(format!("expected one cancel, got {}", harness.runtime.cancel_count()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Client Cancel
// ============================================================================

#[tokio::test(start_paused = true)]
async fn client_cancel_emits_single_error_and_cancels_once() -> TestResult {
    let harness = harness(ScriptedRuntime::default(), settings(20, false));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(5), "calculator/wait", json!({}))).await;
    let runtime = harness.runtime.clone();
    wait_until(|| runtime.poll_count() > 0).await;

    let response = client.request(cancel(json!(5))).await;
    let error = response.error.ok_or("expected cancellation error")?;
    if response.id != Some(json!(5)) || error.code != -32800 {
        return Err(format!("unexpected cancel reply: {error:?}"));
    }
    wait_until(|| runtime.cancel_count() == 1).await;

    // A repeated cancel for the same id is ignored.
    client.send(cancel(json!(5))).await;
    let rest = client.close().await;
    if !rest.is_empty() {
        return Err(format!("no message may follow the cancellation: {rest:?}"));
    }
    if harness.runtime.cancel_count() != 1 {
        return Err(format!("expected one cancel, got {}", harness.runtime.cancel_count()));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_for_unknown_request_is_ignored() -> TestResult {
    let runtime = ScriptedRuntime::default().script("add", vec![Ok(OperationStatus::Completed(json!(5)))]);
    let harness = harness(runtime, settings(20, false));
    let mut client = connect(&harness.gateway);
    client.send(cancel(json!(99))).await;
    let response = client.request(call(json!(1), "calculator/add", json!({ "a": 2, "b": 3 }))).await;
    if response.id != Some(json!(1)) || response.result.is_none() {
        return Err(format!("expected the add result, got {response:?}"));
    }
    client.close().await;
    if harness.runtime.cancel_count() != 0 {
        return Err("unknown cancel must not reach the runtime".to_string());
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn other_calls_continue_after_a_cancel() -> TestResult {
    let runtime = ScriptedRuntime::default().script(
        "answer",
        vec![Ok(OperationStatus::Pending), Ok(OperationStatus::Pending), Ok(OperationStatus::Completed(json!(42)))],
    );
    let harness = harness(runtime, settings(20, false));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(1), "calculator/wait", json!({}))).await;
    client.send(call(json!(2), "calculator/answer", json!({}))).await;
    let runtime = harness.runtime.clone();
    wait_until(|| runtime.start_count() == 2 && runtime.poll_count() >= 2).await;

    let canceled = client.request(cancel(json!(1))).await;
    if canceled.id != Some(json!(1)) {
        return Err(format!("expected the cancel reply first, got {canceled:?}"));
    }
    let answer = client.recv().await;
    if answer.id != Some(json!(2)) || answer.result.is_none() {
        return Err(format!("expected the answer result, got {answer:?}"));
    }
    client.close().await;
    if harness.runtime.cancel_count() != 1 {
        return Err(format!("expected one cancel, got {}", harness.runtime.cancel_count()));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn client_cancel_ignores_completion_reported_after_cancel() -> TestResult {
    let runtime = ScriptedRuntime::default().with_late_completion().script("slow", late_completion_script());
    let harness = harness(runtime, settings(20, false));
    let mut client = connect(&harness.gateway);
    client.send(call(json!(3), "calculator/slow", json!({}))).await;
    let runtime = harness.runtime.clone();
    wait_until(|| runtime.poll_count() > 0).await;

    let response = client.request(cancel(json!(3))).await;
    let error = response.error.ok_or("expected cancellation error")?;
    if response.id != Some(json!(3)) || error.code != -32800 {
        return Err(format!("unexpected cancel reply: {error:?}"));
    }
    wait_until(|| runtime.cancel_count() == 1).await;

    // Give the runtime time to report its late completion.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let rest = client.close().await;
    if !rest.is_empty() {
        return Err(format!("no message may follow the cancellation: {rest:?}"));
    }
    if harness.runtime.cancel_count() != 1 {
        return Err(format!("expected one cancel, got {}", harness.runtime.cancel_count()));
    }
    Ok(())
}
