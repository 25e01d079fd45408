//! Integration tests for the tracing feature.
//!
//! These tests install a thread-local subscriber that writes into a buffer
//! and check that control block creation and destruction are reported.

#![cfg(feature = "tracing")]

use shared_ptr::{SharedPtr, Upcast};
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture<F: FnOnce()>(f: F) -> String {
    let writer = CaptureWriter::default();
    let make_writer = {
        let writer = writer.clone();
        move || writer.clone()
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();

    let guard = subscriber.set_default();
    f();
    drop(guard);
    writer.contents()
}

struct Marker;

#[test]
fn test_block_lifecycle_is_logged() {
    let output = capture(|| {
        let sp = SharedPtr::new(Marker);
        let copy = SharedPtr::clone(&sp);
        drop((sp, copy));
    });

    assert!(output.contains("block_created"), "{output}");
    assert!(output.contains("block_destroyed"), "{output}");
    assert!(output.contains("Marker"), "{output}");
    assert_eq!(output.matches("block_destroyed").count(), 1);
}

#[test]
fn test_adopted_box_reports_concrete_type() {
    #[derive(Debug, Upcast)]
    #[upcast(dyn Debug + Send + Sync)]
    struct Gauge(u32);

    let output = capture(|| {
        let shown = SharedPtr::<dyn Debug + Send + Sync>::adopt(Box::new(Gauge(7)));
        drop(shown);
    });

    assert!(output.contains("Gauge"), "{output}");
    assert!(!output.contains("dyn "), "{output}");
}

#[test]
fn test_live_block_is_not_reported_destroyed() {
    let mut kept = None;
    let output = capture(|| {
        kept = Some(SharedPtr::new(1_u8));
    });

    assert!(output.contains("block_created"), "{output}");
    assert!(!output.contains("block_destroyed"), "{output}");
    assert_eq!(kept.map(|sp| *sp), Some(1));
}
