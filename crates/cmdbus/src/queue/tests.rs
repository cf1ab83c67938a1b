//! Unit tests for framed queues and fan-out.

use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use rstest::{fixture, rstest};

use super::{FanOut, FramedQueue, MessageSink, QueueError};

#[fixture]
fn queue() -> FramedQueue {
    FramedQueue::new()
}

fn drain(queue: &FramedQueue) -> Vec<String> {
    std::iter::from_fn(|| queue.try_get().ok())
        .map(|message| message.into_string())
        .collect()
}

fn readable(fd: BorrowedFd<'_>) -> bool {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::ZERO).expect("poll readiness descriptor");
    let [watched] = &fds;
    ready > 0
        && watched
            .revents()
            .is_some_and(|events| events.contains(PollFlags::POLLIN))
}

#[rstest]
#[case(&["pippo\n"], &["pippo\n"])]
#[case(&["pippo\npluto\n"], &["pippo\n", "pluto\n"])]
#[case(&["pip", "po\npl", "uto\n"], &["pippo\n", "pluto\n"])]
#[case(&["pippo\npluto\npaperino"], &["pippo\n", "pluto\n"])]
#[case(&["\n\n"], &["\n", "\n"])]
#[case(&["no terminator"], &[])]
fn yields_only_complete_lines(
    queue: FramedQueue,
    #[case] chunks: &[&str],
    #[case] expected: &[&str],
) {
    for chunk in chunks {
        queue.put(chunk);
    }
    assert_eq!(drain(&queue), expected);
}

#[rstest]
fn fragment_completes_on_later_put(queue: FramedQueue) {
    queue.put("pippo\npluto\npaperino");
    assert_eq!(drain(&queue), ["pippo\n", "pluto\n"]);
    assert_eq!(queue.fragment_len(), "paperino".len());

    queue.put(" e paperina\n");
    assert_eq!(drain(&queue), ["paperino e paperina\n"]);
    assert_eq!(queue.fragment_len(), 0);
}

#[rstest]
fn message_count_matches_newline_count(queue: FramedQueue) {
    let payload = "a\nbb\n\nccc\ndddd\ne";
    let newlines = payload.matches('\n').count();
    for chunk in payload.as_bytes().chunks(3) {
        queue
            .put_bytes(chunk)
            .expect("ascii chunks are valid UTF-8");
    }

    let messages = drain(&queue);
    assert_eq!(messages.len(), newlines);
    assert!(messages.iter().all(|message| message.ends_with('\n')));
    assert!(
        messages
            .iter()
            .all(|message| message.matches('\n').count() == 1)
    );
}

#[rstest]
fn non_text_put_leaves_state_unchanged(queue: FramedQueue) {
    queue.put("first\nhalf");
    let error = queue
        .put_bytes(&[b'x', 0xff, b'\n'])
        .expect_err("invalid UTF-8 must be rejected");
    assert!(matches!(error, QueueError::TypeMismatch { .. }));

    assert_eq!(queue.pending(), 1);
    assert_eq!(queue.fragment_len(), "half".len());
    queue.put(" done\n");
    assert_eq!(drain(&queue), ["first\n", "half done\n"]);
}

#[rstest]
fn try_get_on_empty_queue_fails(queue: FramedQueue) {
    assert!(matches!(queue.try_get(), Err(QueueError::Empty)));
}

#[rstest]
fn get_timeout_expires_with_partial_line(queue: FramedQueue) {
    queue.put("partial");
    let error = queue
        .get_timeout(Duration::from_millis(20))
        .expect_err("fragment must not be retrievable");
    assert!(matches!(error, QueueError::Empty));
}

#[rstest]
fn get_blocks_until_line_completes() {
    let queue = Arc::new(FramedQueue::new());
    let producer = Arc::clone(&queue);
    let handle = thread::spawn(move || {
        producer.put("he");
        thread::sleep(Duration::from_millis(20));
        producer.put("llo\n");
    });

    let message = queue.get();
    assert_eq!(message.as_str(), "hello\n");
    handle.join().expect("producer thread");
}

#[rstest]
fn readiness_tracks_pending_messages(queue: FramedQueue) {
    queue.put("one\ntwo\n");
    {
        let fd = queue.readiness_fd().expect("readiness descriptor");
        assert!(readable(fd), "pending messages should prime the descriptor");
    }

    queue.try_get().expect("first message");
    assert!(readable(queue.readiness_fd().expect("descriptor")));
    queue.try_get().expect("second message");
    assert!(!readable(queue.readiness_fd().expect("descriptor")));

    queue.put("thr");
    assert!(!readable(queue.readiness_fd().expect("descriptor")));
    queue.put("ee\nfour\n");
    assert!(readable(queue.readiness_fd().expect("descriptor")));
    assert_eq!(queue.pending(), 2);
}

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<String>>,
}

impl MessageSink for RecordingSink {
    fn send(&self, text: &str) -> Result<(), QueueError> {
        self.seen
            .lock()
            .expect("recording lock")
            .push(text.to_owned());
        Ok(())
    }
}

struct FailingSink;

impl MessageSink for FailingSink {
    fn send(&self, _text: &str) -> Result<(), QueueError> {
        Err(QueueError::Empty)
    }
}

#[rstest]
fn fan_out_replicates_to_every_branch() {
    let left = Arc::new(FramedQueue::new());
    let right = Arc::new(FramedQueue::new());
    let fan_out = FanOut::new()
        .with_branch(Arc::clone(&left) as Arc<dyn MessageSink>)
        .with_branch(Arc::clone(&right) as Arc<dyn MessageSink>);

    fan_out.send("POS 1.0\n").expect("fan-out send");

    assert_eq!(drain(&left), ["POS 1.0\n"]);
    assert_eq!(drain(&right), ["POS 1.0\n"]);
}

#[rstest]
fn fan_out_keeps_delivering_past_a_failing_branch() {
    let recorder = Arc::new(RecordingSink::default());
    let fan_out = FanOut::new()
        .with_branch(Arc::new(FailingSink))
        .with_branch(Arc::clone(&recorder) as Arc<dyn MessageSink>);

    let result = fan_out.send("MOVING 1\n");

    assert!(result.is_err());
    assert_eq!(
        *recorder.seen.lock().expect("recording lock"),
        ["MOVING 1\n"]
    );
}
