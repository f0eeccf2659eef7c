//! Driving a tool: timer dispatch interleaved with block rendering.
//!
//! A tool owns its [`AudioContext`] and a [`TimerQueue`] of its own event
//! type. [`drive`] renders in blocks no longer than the configured block
//! size and never past the next due timer, so every event fires on the
//! exact device frame it was scheduled for.

use crate::context::{AudioContext, Frame};
use crate::timer::TimerQueue;

pub trait Driven {
    type Event;

    fn context(&mut self) -> &mut AudioContext;

    fn timers(&mut self) -> &mut TimerQueue<Self::Event>;

    fn on_timer(&mut self, event: Self::Event);
}

/// Fire every timer due at the current frame
pub fn dispatch_due<D: Driven + ?Sized>(tool: &mut D) {
    let now = tool.context().current_frame();
    while let Some(event) = tool.timers().pop_due(now) {
        tool.on_timer(event);
    }
}

/// Render `frames` frames from `tool`, firing timers along the way
pub fn drive<D: Driven + ?Sized>(tool: &mut D, frames: usize) -> Vec<Frame> {
    let mut out = Vec::with_capacity(frames);
    let mut remaining = frames;

    loop {
        dispatch_due(tool);
        if remaining == 0 {
            break;
        }

        let ctx = tool.context();
        let running = ctx.is_running();
        let now = ctx.current_frame();
        let mut chunk = remaining.min(ctx.config().block_size);

        // Timers only advance with the clock
        if running {
            if let Some(due) = tool.timers().next_due() {
                let until = due.saturating_sub(now).max(1);
                chunk = chunk.min(usize::try_from(until).unwrap_or(usize::MAX));
            }
        }

        tool.context().render(chunk, &mut out);
        remaining -= chunk;
    }

    out
}
