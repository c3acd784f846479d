// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::util::sink::UnboundedSink,
    futures::channel::mpsc,
    std::time::{Duration, Instant},
};

pub type TimeEntry<E> = (Instant, TimedEvent<E>);
pub type TimeSender<E> = UnboundedSink<TimeEntry<E>>;
pub type TimeStream<E> = mpsc::UnboundedReceiver<TimeEntry<E>>;
pub type EventId = u64;

/// The returned timer sends scheduled timeouts to the returned stream. Note
/// that nothing here waits: deadlines only take effect when entries are
/// pulled off the stream and applied by the event loop (or, in tests, by
/// hand).
pub fn create_timer<E>() -> (Timer<E>, TimeStream<E>) {
    let (timer_sink, time_stream) = mpsc::unbounded();
    (Timer::new(UnboundedSink::new(timer_sink)), time_stream)
}

#[derive(Debug)]
pub struct TimedEvent<E> {
    pub id: EventId,
    pub event: E,
}

impl<E: Clone> Clone for TimedEvent<E> {
    fn clone(&self) -> Self {
        TimedEvent { id: self.id, event: self.event.clone() }
    }
}

pub struct Timer<E> {
    sender: TimeSender<E>,
    next_id: EventId,
}

impl<E> Timer<E> {
    pub fn new(sender: TimeSender<E>) -> Self {
        Timer { sender, next_id: 0 }
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn schedule_at(&mut self, deadline: Instant, event: E) -> EventId {
        let id = self.next_id;
        self.sender.send((deadline, TimedEvent { id, event }));
        self.next_id += 1;
        id
    }

    pub fn schedule_after(&mut self, duration: Duration, event: E) -> EventId {
        let deadline = Instant::now() + duration;
        self.schedule_at(deadline, event)
    }

    pub fn schedule<EV>(&mut self, event: EV) -> EventId
    where
        EV: TimeoutDuration + Into<E>,
    {
        let duration = event.timeout_duration();
        self.schedule_after(duration, event.into())
    }
}

pub trait TimeoutDuration {
    fn timeout_duration(&self) -> Duration;
}

#[cfg(test)]
mod tests {
    use {super::*, crate::assert_variant};

    type Event = u32;
    impl TimeoutDuration for Event {
        fn timeout_duration(&self) -> Duration {
            Duration::from_secs(10)
        }
    }

    #[test]
    fn timer_schedule_at() {
        let (mut timer, mut time_stream) = create_timer::<Event>();
        let timeout1 = Instant::now() + Duration::from_secs(5);
        let timeout2 = Instant::now() + Duration::from_secs(10);
        assert_eq!(timer.schedule_at(timeout1, 7), 0);
        assert_eq!(timer.schedule_at(timeout2, 9), 1);

        let (t1, event1) = time_stream.try_next().unwrap().expect("expect time entry");
        assert_eq!(t1, timeout1);
        assert_eq!(event1.id, 0);
        assert_eq!(event1.event, 7);

        let (t2, event2) = time_stream.try_next().unwrap().expect("expect time entry");
        assert_eq!(t2, timeout2);
        assert_eq!(event2.id, 1);
        assert_eq!(event2.event, 9);

        assert_variant!(time_stream.try_next(), Err(_));
    }

    #[test]
    fn timer_schedule_after() {
        let (mut timer, mut time_stream) = create_timer::<Event>();
        assert_eq!(timer.schedule_after(Duration::from_secs(1000), 7), 0);
        assert_eq!(timer.schedule_after(Duration::from_secs(5), 9), 1);

        let (t1, event1) = time_stream.try_next().unwrap().expect("expect time entry");
        assert_eq!(event1.id, 0);
        assert_eq!(event1.event, 7);

        let (t2, event2) = time_stream.try_next().unwrap().expect("expect time entry");
        assert_eq!(event2.id, 1);
        assert_eq!(event2.event, 9);

        // Ordering of the deadlines must match the requested durations.
        assert!(t1 > t2);

        assert_variant!(time_stream.try_next(), Err(_));
    }

    #[test]
    fn timer_schedule() {
        let (mut timer, mut time_stream) = create_timer::<Event>();
        let start = Instant::now();

        assert_eq!(timer.schedule(5u32), 0);

        let (t, event) = time_stream.try_next().unwrap().expect("expect time entry");
        assert_eq!(event.id, 0);
        assert_eq!(event.event, 5);
        assert!(start + Duration::from_secs(10) <= t);
    }
}
