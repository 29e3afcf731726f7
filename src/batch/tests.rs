//! Batch Module Tests
//!
//! End-to-end batch scenarios over real child processes: ordering, timeout
//! budgets, deduplication, and response rendering.

#[cfg(test)]
mod tests {
    use crate::batch::orchestrator::run_batch;
    use crate::batch::{format, sink};
    use crate::config::{Config, ContentEncoding, Context};
    use crate::notify::LogNotifier;
    use crate::pipeline::types::{Batch, ItemTimeout, ResultRecord, WorkItem};

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn test_context() -> Arc<Context> {
        let mut config = Config::default();
        config.apply_defaults();
        Context::new(&config, Arc::new(LogNotifier)).unwrap()
    }

    fn item(input: &str, expect: &str) -> WorkItem {
        let mut item = WorkItem::command(input);
        item.expect = expect.to_string();
        item
    }

    // ============================================================
    // Scenario: batch of commands, all pass
    // ============================================================

    #[tokio::test]
    async fn test_batch_all_pass() {
        let ctx = test_context();
        let batch = Batch::new(vec![
            item("echo hello", "hello"),
            item("echo 42", "$count > 40"),
        ]);

        let records = run_batch(&ctx, batch).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].error_code, "0");
        assert!(records[0].content.contains("hello"));
        assert_eq!(records[1].error_code, "0");
        assert!(records[1].content.contains("42"));
    }

    // ============================================================
    // Scenario: expectation mismatch
    // ============================================================

    #[tokio::test]
    async fn test_batch_expect_mismatch() {
        let ctx = test_context();
        let batch = Batch::new(vec![item("echo goodbye", "hello")]);

        let records = run_batch(&ctx, batch).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_code, "-1");
        assert_eq!(records[0].content, "goodbye\n");
    }

    // ============================================================
    // Scenario: per-item timeout
    // ============================================================

    #[tokio::test]
    async fn test_batch_item_timeout_within_budget() {
        let ctx = test_context();
        let mut slow = WorkItem::command("sleep 10");
        slow.timeout = ItemTimeout::Secs(1);
        let batch = Batch::new(vec![slow]);

        let start = Instant::now();
        let records = run_batch(&ctx, batch).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_code, "-1");
        assert!(records[0].content.contains("timed out"));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }

    // ============================================================
    // Scenario: deduplication
    // ============================================================

    #[tokio::test]
    async fn test_batch_duplicate_inputs_probe_once() {
        let ctx = test_context();
        let marker = std::env::temp_dir().join(format!("mcall-dedup-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);

        let command = format!("bash -c 'echo hit >> {}'", marker.display());
        let batch = Batch::new(vec![
            WorkItem::command(&command),
            WorkItem::command(&command),
            WorkItem::command(&command),
        ]);

        let records = run_batch(&ctx, batch).await.unwrap();

        // three records, one spawn
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.error_code, "0");
        }
        let hits = std::fs::read_to_string(&marker).unwrap_or_default();
        assert_eq!(hits.lines().count(), 1, "probe ran more than once");
        let _ = std::fs::remove_file(&marker);
    }

    // ============================================================
    // Ordering and boundary behavior
    // ============================================================

    #[tokio::test]
    async fn test_results_come_back_in_submission_order() {
        let ctx = test_context();
        let batch = Batch::new(vec![
            item("sleep 0.4", ""),
            item("echo fast", ""),
            item("sleep 0.2", ""),
            item("echo faster", ""),
        ]);

        let records = run_batch(&ctx, batch).await.unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].input, "sleep 0.4");
        assert_eq!(records[1].input, "echo fast");
        assert_eq!(records[1].content, "fast\n");
        assert_eq!(records[2].input, "sleep 0.2");
        assert_eq!(records[3].content, "faster\n");
    }

    #[tokio::test]
    async fn test_empty_input_is_a_successful_noop() {
        let ctx = test_context();
        let batch = Batch::new(vec![WorkItem::command("")]);

        let records = run_batch(&ctx, batch).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_code, "0");
        assert!(records[0].content.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_yields_no_records() {
        let ctx = test_context();
        let records = run_batch(&ctx, Batch::new(vec![])).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_does_not_abort_batch() {
        let ctx = test_context();
        let batch = Batch::new(vec![
            item("definitely-not-a-binary-xyz", ""),
            item("echo survivor", "survivor"),
        ]);

        let records = run_batch(&ctx, batch).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].error_code, "-1");
        assert_eq!(records[1].error_code, "0");
    }

    // ============================================================
    // Rendering
    // ============================================================

    fn record(content: &str, code: &str) -> ResultRecord {
        ResultRecord {
            input: "echo x".to_string(),
            name: "probe".to_string(),
            error_code: code.to_string(),
            content: content.to_string(),
            ts: "2025-01-01T00:00:00.000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_render_json_includes_subject_and_hostname() {
        let mut config = Config::default();
        config.request.subject = "uptime".to_string();
        config.apply_defaults();
        let ctx = Context::new(&config, Arc::new(LogNotifier)).unwrap();

        let rendered = format::render_json(&ctx, &[record("x\n", "0")]);

        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0]["subject"], "uptime");
        assert_eq!(rendered[0]["errorCode"], "0");
        assert_eq!(rendered[0]["result"], "x\n");
        assert!(rendered[0].contains_key("hostname"));
        assert!(rendered[0].contains_key("ts"));
    }

    #[test]
    fn test_render_plain_frames_each_record() {
        let out = format::render_plain(&[record("first\n", "0"), record("second\n", "-1")]);
        assert!(out.contains("first\n"));
        assert!(out.contains("second\n"));
        assert_eq!(out.matches("=====").count(), 2);
    }

    #[test]
    fn test_encode_content_variants() {
        assert_eq!(format::encode_content(ContentEncoding::Raw, "abc"), "abc");
        assert_eq!(
            format::encode_content(ContentEncoding::Std, "abc"),
            STANDARD.encode("abc")
        );
        // URL alphabet differs from the standard one on 62/63
        assert_eq!(
            format::encode_content(ContentEncoding::Url, "\u{00fb}\u{00ff}"),
            base64::engine::general_purpose::URL_SAFE.encode("\u{00fb}\u{00ff}")
        );
    }

    #[test]
    fn test_bulk_payload_shape() {
        let ctx = test_context();
        let rendered = format::render_json(&ctx, &[record("a", "0"), record("b", "0")]);
        let payload = sink::bulk_payload(&rendered).unwrap();

        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "{ \"index\":{} }");
        assert!(lines[1].contains("\"errorCode\""));
        assert_eq!(lines[2], "{ \"index\":{} }");
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn test_daily_index_name_carries_utc_date() {
        let name = sink::daily_index_name("mcall_data");
        let expected = format!("mcall_data-{}", chrono::Utc::now().format("%Y.%m.%d"));
        assert_eq!(name, expected);
    }
}
