// ==========================================
// 任务取消测试
// ==========================================
// 测试目标: 协作式取消只在批次边界生效；终态任务不可取消
// ==========================================


use bulk_transfer_engine::domain::row::RowRecord;
use bulk_transfer_engine::domain::task::TaskRequest;
use bulk_transfer_engine::domain::types::{FileFormat, TaskStatus};
use bulk_transfer_engine::engine::TaskError;
use bulk_transfer_engine::logging;
use std::sync::{Arc, Mutex};
use test_helpers::{file_count, harness_with, user_rows, valid_user_csv, USER_TYPE};

fn user_export(format: FileFormat) -> TaskRequest {
    TaskRequest::export("导出", "admin", USER_TYPE, format, serde_json::Value::Null)
}

#[test]
fn test_cancel_during_batch_stops_after_that_batch() {
    logging::init_test();
    let h = harness_with(|c| c.batch_size = 2);
    let source = h.save_csv(&valid_user_csv(10));
    let task_id = h
        .engine
        .create_task(TaskRequest::import("导入", "admin", USER_TYPE, FileFormat::Csv, source))
        .unwrap();

    let engine = h.engine.clone();
    let id = task_id.clone();
    h.persister.set_hook(move |batch| {
        if batch == 2 {
            assert!(engine.cancel(&id).unwrap());
        }
        Ok(())
    });

    let snapshot = h.engine.execute(&task_id).unwrap();

    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    // 第 2 批已完成落库，不回滚
    assert_eq!(h.persister.batch_count(), 2);
    assert_eq!(h.persister.rows().len(), 4);
    assert_eq!(snapshot.success_count, 4);
    assert!(snapshot.result_artifact.is_none());
    assert!(snapshot.error_report.is_none());
    assert!(snapshot.finished_at.is_some());

    // 终态后不可再次取消
    assert!(!h.engine.cancel(&task_id).unwrap());
}

#[test]
fn test_cancel_pending_task() {
    let h = harness_with(|_| {});
    let source = h.save_csv(&valid_user_csv(3));
    let task_id = h
        .engine
        .create_task(TaskRequest::import("导入", "admin", USER_TYPE, FileFormat::Csv, source))
        .unwrap();

    assert!(h.engine.cancel(&task_id).unwrap());
    assert_eq!(
        h.engine.query_progress(&task_id).unwrap().status,
        TaskStatus::Cancelled
    );

    let err = h.engine.execute(&task_id).unwrap_err();
    assert!(matches!(err, TaskError::InvalidStateTransition { .. }));
    assert_eq!(h.persister.batch_count(), 0);
    assert!(!h.engine.cancel(&task_id).unwrap());
}

#[test]
fn test_cancelled_export_never_queries_source() {
    let h = harness_with(|c| c.batch_size = 3);
    let rows = (1..=9)
        .map(|i| {
            let name = format!("user{}", i);
            RowRecord::from_pairs(i, &[("username", name.as_str()), ("email", "x@example.com")])
        })
        .collect();
    h.source.set_rows(rows);

    let task_id = h
        .engine
        .create_task(TaskRequest::export(
            "导出",
            "admin",
            USER_TYPE,
            FileFormat::Csv,
            serde_json::Value::Null,
        ))
        .unwrap();
    h.engine.cancel(&task_id).unwrap();

    // 已取消的任务不再执行，数据源未被访问
    assert!(h.engine.execute(&task_id).is_err());
    assert_eq!(h.source.fetch_count(), 0);
    let tmp_entries = std::fs::read_dir(h.config.temp_dir())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(tmp_entries, 0);
}

#[test]
fn test_cancel_unknown_task() {
    let h = harness_with(|_| {});
    assert!(matches!(
        h.engine.cancel("missing"),
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_submitted_task_reaches_terminal_state() {
    let h = harness_with(|c| {
        c.batch_size = 1;
        c.worker_threads = 1;
    });
    let source = h.save_csv(&valid_user_csv(200));
    let task_id = h
        .engine
        .submit(TaskRequest::import("导入", "admin", USER_TYPE, FileFormat::Csv, source))
        .unwrap();

    let accepted = h.engine.cancel(&task_id).unwrap();
    let snapshot = test_helpers::wait_for_terminal(&h.engine, &task_id).await;

    // 取消请求可能早于或晚于执行开始，任务都以 CANCELLED 结束
    assert!(accepted);
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(h.persister.rows().len() < 200);
}

#[test]
fn test_cancel_running_export_after_second_page() {
    for format in [FileFormat::Csv, FileFormat::Xlsx] {
        let h = harness_with(|c| c.batch_size = 2);
        h.source.set_rows(user_rows(10));
        let task_id = h.engine.create_task(user_export(format)).unwrap();

        let engine = h.engine.clone();
        let id = task_id.clone();
        h.source.set_hook(move |page| {
            if page == 2 {
                assert!(engine.cancel(&id).unwrap());
            }
        });

        let snapshot = h.engine.execute(&task_id).unwrap();

        assert_eq!(snapshot.status, TaskStatus::Cancelled, "{}", format);
        assert!(snapshot.result_artifact.is_none());
        // 第 2 页取回后停止，不再拉取第 3 页
        assert_eq!(h.source.fetch_count(), 2);
        assert_eq!(snapshot.total_count, 4);
        assert_eq!(file_count(&h.config.temp_dir()), 0);
        assert_eq!(file_count(&h.config.artifact_dir()), 0);
    }
}

#[test]
fn test_cancel_after_last_page_still_ends_cancelled() {
    let h = harness_with(|c| c.batch_size = 10);
    h.source.set_rows(user_rows(3));
    let task_id = h.engine.create_task(user_export(FileFormat::Csv)).unwrap();

    // 唯一一页即最后一页：取消请求在导出写完之后、任务结束之前登记
    let accepted = Arc::new(Mutex::new(None));
    let engine = h.engine.clone();
    let id = task_id.clone();
    let accepted_in_hook = accepted.clone();
    h.source.set_hook(move |_| {
        *accepted_in_hook.lock().unwrap() = Some(engine.cancel(&id).unwrap());
    });

    let snapshot = h.engine.execute(&task_id).unwrap();

    assert_eq!(*accepted.lock().unwrap(), Some(true));
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.result_artifact.is_none());
    assert_eq!(h.source.fetch_count(), 1);
    // 已写出的结果文件随取消删除
    assert_eq!(file_count(&h.config.artifact_dir()), 0);
}

#[tokio::test]
async fn test_schedule_rejects_running_task() {
    let h = harness_with(|c| c.batch_size = 2);
    let source = h.save_csv(&valid_user_csv(4));
    let task_id = h
        .engine
        .create_task(TaskRequest::import("导入", "admin", USER_TYPE, FileFormat::Csv, source))
        .unwrap();

    let rejected = Arc::new(Mutex::new(Vec::new()));
    let engine = h.engine.clone();
    let id = task_id.clone();
    let rejected_in_hook = rejected.clone();
    h.persister.set_hook(move |batch| {
        if batch == 1 {
            let result = engine.schedule(&id);
            rejected_in_hook
                .lock()
                .unwrap()
                .push(matches!(result, Err(TaskError::TaskAlreadyRunning(_))));
        }
        Ok(())
    });

    let snapshot = h.engine.execute(&task_id).unwrap();

    assert_eq!(snapshot.status, TaskStatus::Succeeded);
    assert_eq!(*rejected.lock().unwrap(), vec![true]);
    assert_eq!(h.persister.batch_count(), 2);

    // 终态任务不可再调度
    assert!(matches!(
        h.engine.schedule(&task_id),
        Err(TaskError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_schedule_twice_runs_once() {
    let h = harness_with(|c| c.batch_size = 2);
    let source = h.save_csv(&valid_user_csv(3));
    let task_id = h
        .engine
        .submit(TaskRequest::import("导入", "admin", USER_TYPE, FileFormat::Csv, source))
        .unwrap();

    assert!(matches!(
        h.engine.schedule(&task_id),
        Err(TaskError::TaskAlreadyRunning(_))
    ));

    let snapshot = test_helpers::wait_for_terminal(&h.engine, &task_id).await;
    assert_eq!(snapshot.status, TaskStatus::Succeeded);
    assert_eq!(h.persister.rows().len(), 3);
}
