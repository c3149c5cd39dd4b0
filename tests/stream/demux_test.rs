//! Tests for stream demultiplexing over in-memory streams.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use script_supervisor::stream::{OutputEvent, StreamDemultiplexer, StreamKind};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

type Collected<T> = Arc<Mutex<Vec<T>>>;

fn collect_lines(demux: &StreamDemultiplexer) -> Collected<String> {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    demux.on_line(move |line| sink.lock().unwrap().push(line.to_string()));
    lines
}

fn collect_chunks(demux: &StreamDemultiplexer) -> Collected<Vec<u8>> {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    demux.on_chunk(move |chunk| sink.lock().unwrap().push(chunk.as_bytes().to_vec()));
    chunks
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Yields its data once, then fails every read.
struct FailingReader {
    data: Option<Vec<u8>>,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe broke",
            ))),
        }
    }
}

#[tokio::test]
async fn lines_then_remainder_flushed_at_end() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stdout);
    let lines = collect_lines(&demux);
    let chunks = collect_chunks(&demux);
    demux.start(server).unwrap();

    client.write_all(b"first\nsecond\r\nthird\npartial").await.unwrap();
    drop(client);
    demux.closed().await;

    assert_eq!(
        *lines.lock().unwrap(),
        vec!["first", "second", "third", "partial"]
    );
    let remainder: Vec<u8> = chunks.lock().unwrap().concat();
    assert_eq!(remainder, b"partial");
}

#[tokio::test]
async fn progress_chunks_arrive_before_line() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stderr);
    let lines = collect_lines(&demux);
    let chunks = collect_chunks(&demux);
    demux.start(server).unwrap();

    client.write_all(b"[=====     ]").await.unwrap();
    wait_until(|| !chunks.lock().unwrap().is_empty()).await;
    assert!(lines.lock().unwrap().is_empty());

    client.write_all(b" 50%\n").await.unwrap();
    drop(client);
    demux.closed().await;

    assert_eq!(*lines.lock().unwrap(), vec!["[=====     ] 50%"]);
    assert_eq!(chunks.lock().unwrap().concat(), b"[=====     ]");
}

#[tokio::test]
async fn terminated_output_produces_no_chunks() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stdout);
    let chunks = collect_chunks(&demux);
    demux.start(server).unwrap();

    client.write_all(b"a\nb\n").await.unwrap();
    drop(client);
    demux.closed().await;

    assert!(chunks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn lines_reproduce_input() {
    let input = b"alpha\n\nbeta gamma\n\tdelta\nomega".to_vec();

    for _ in 0..3 {
        let (mut client, server) = tokio::io::duplex(8);
        let demux = StreamDemultiplexer::new(StreamKind::Stdout);
        let lines = collect_lines(&demux);
        demux.start(server).unwrap();

        let data = input.clone();
        tokio::spawn(async move {
            for piece in data.chunks(3) {
                client.write_all(piece).await.unwrap();
            }
        });
        demux.closed().await;

        let rebuilt = lines.lock().unwrap().join("\n");
        assert_eq!(rebuilt.as_bytes(), input.as_slice());
    }
}

#[tokio::test]
async fn late_subscriber_misses_earlier_events() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stdout);
    let early = collect_lines(&demux);
    demux.start(server).unwrap();

    client.write_all(b"one\n").await.unwrap();
    wait_until(|| early.lock().unwrap().len() == 1).await;

    let late = collect_lines(&demux);
    client.write_all(b"two\n").await.unwrap();
    drop(client);
    demux.closed().await;

    assert_eq!(*early.lock().unwrap(), vec!["one", "two"]);
    assert_eq!(*late.lock().unwrap(), vec!["two"]);
}

#[tokio::test]
async fn read_error_is_end_of_stream() {
    let demux = StreamDemultiplexer::new(StreamKind::Stderr);
    let lines = collect_lines(&demux);
    demux
        .start(FailingReader {
            data: Some(b"ok\ncut off".to_vec()),
        })
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), demux.closed())
        .await
        .expect("demultiplexer should close after a read error");

    assert_eq!(*lines.lock().unwrap(), vec!["ok", "cut off"]);
}

#[tokio::test]
async fn panicking_subscriber_does_not_silence_others() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stdout);
    demux.on_line(|line| {
        if line == "boom" {
            panic!("subscriber failure");
        }
    });
    let lines = collect_lines(&demux);
    demux.start(server).unwrap();

    client.write_all(b"before\nboom\nafter\n").await.unwrap();
    drop(client);
    tokio::time::timeout(Duration::from_secs(5), demux.closed())
        .await
        .expect("stream should close normally");

    assert_eq!(*lines.lock().unwrap(), vec!["before", "boom", "after"]);
}

#[tokio::test]
async fn subscribe_stream_ends_on_close() {
    let (mut client, server) = tokio::io::duplex(1024);
    let demux = StreamDemultiplexer::new(StreamKind::Stdout);
    let events = demux.subscribe();
    demux.start(server).unwrap();

    client.write_all(b"x\ny").await.unwrap();
    drop(client);

    let events: Vec<OutputEvent> = tokio::time::timeout(Duration::from_secs(5), events.collect())
        .await
        .unwrap();

    let lines: Vec<&str> = events.iter().filter_map(OutputEvent::as_line).collect();
    assert_eq!(lines, vec!["x", "y"]);
    assert_eq!(events.iter().filter(|e| e.as_chunk().is_some()).count(), 1);
}

#[tokio::test]
async fn subscribe_after_close_is_empty() {
    let demux = StreamDemultiplexer::spawn(StreamKind::Stdout, tokio::io::empty());
    demux.closed().await;

    let events: Vec<OutputEvent> = demux.subscribe().collect().await;
    assert!(events.is_empty());
    assert!(demux.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_subscriber_does_not_stall_other_stream() {
    let (mut out_client, out_server) = tokio::io::duplex(1024);
    let (mut err_client, err_server) = tokio::io::duplex(1024);

    let stdout = StreamDemultiplexer::new(StreamKind::Stdout);
    let stderr = StreamDemultiplexer::new(StreamKind::Stderr);
    stdout.on_line(|_| std::thread::sleep(Duration::from_millis(500)));
    let err_lines = collect_lines(&stderr);

    stdout.start(out_server).unwrap();
    stderr.start(err_server).unwrap();

    out_client.write_all(b"slow\n").await.unwrap();
    err_client.write_all(b"fast\n").await.unwrap();
    drop(out_client);
    drop(err_client);

    stderr.closed().await;
    assert_eq!(*err_lines.lock().unwrap(), vec!["fast"]);
    assert!(!stdout.is_closed());

    stdout.closed().await;
}
