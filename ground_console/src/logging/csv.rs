use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OnceCell};
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use uuid::Uuid;

// All logs use the same OnceCell type for simplicity/consistency.
static CONVERSIONS: OnceCell<Arc<Mutex<BufWriter<tokio::fs::File>>>> = OnceCell::const_new();
static STALE: OnceCell<Arc<Mutex<BufWriter<tokio::fs::File>>>> = OnceCell::const_new();

async fn get_file(
    cell: &OnceCell<Arc<Mutex<BufWriter<tokio::fs::File>>>>,
    path: &str,
    header: &str,
) -> Arc<Mutex<BufWriter<tokio::fs::File>>> {
    let arc = cell
        .get_or_init(|| async move {
            let _ = fs::create_dir_all("logs").await;
            let fresh = !fs::try_exists(path).await.unwrap_or(false);
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .expect("open log file");
            let m = Arc::new(Mutex::new(BufWriter::new(f)));
            if fresh {
                let mut g = m.lock().await;
                let _ = g.write_all(header.as_bytes()).await;
                let _ = g.flush().await;
            }
            m
        })
        .await;
    arc.clone()
}

/// conversions.csv: ts,call_id,op,input_format,output_format,outcome,duration_ms
pub async fn log_conversion(
    call_id: Uuid,
    op: &str,
    input_format: &str,
    output_format: &str,
    outcome: &str,
    duration: Duration,
) {
    let ts = Utc::now().to_rfc3339();
    let ms = duration.as_secs_f64() * 1000.0;
    let line = format!("{ts},{call_id},{op},{input_format},{output_format},{outcome},{ms:.3}\n");
    let file = get_file(
        &CONVERSIONS,
        "logs/conversions.csv",
        "ts,call_id,op,input_format,output_format,outcome,duration_ms\n",
    )
    .await;
    let mut f = file.lock().await;
    let _ = f.write_all(line.as_bytes()).await;
    let _ = f.flush().await;
}

/// stale.csv: ts,generation,step
pub async fn log_stale(generation: u64, step: &str) {
    let ts = Utc::now().to_rfc3339();
    let line = format!("{ts},{generation},{step}\n");
    let file = get_file(&STALE, "logs/stale.csv", "ts,generation,step\n").await;
    let mut f = file.lock().await;
    let _ = f.write_all(line.as_bytes()).await;
    let _ = f.flush().await;
}
