// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{Clock, ManualClock, TimerQueue, TimerSource};

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(1_000_000);
    assert_eq!(clock.now(), 0);
    assert_eq!(clock.advance(10), 10);
    clock.set(100);
    assert_eq!(clock.now(), 100);
    assert_eq!(clock.freq(), 1_000_000);
}

#[test]
fn test_timer_queue() {
    let queue = TimerQueue::new();
    let a = queue.alloc();
    let b = queue.alloc();
    let c = queue.alloc();
    assert_ne!(a, b);

    assert_eq!(queue.next_deadline(), None);
    queue.arm(a, 300);
    queue.arm(b, 100);
    queue.arm(c, 200);
    queue.arm(a, 150);
    assert_eq!(queue.deadline(a), Some(150));
    assert_eq!(queue.next_deadline(), Some(100));

    assert!(queue.expired(99).is_empty());
    assert_eq!(queue.expired(150), [b, a]);
    assert_eq!(queue.next_deadline(), Some(200));

    queue.disarm(c);
    assert_eq!(queue.next_deadline(), None);
    assert!(queue.expired(u64::MAX).is_empty());
}
