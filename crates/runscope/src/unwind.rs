//! Frame-pointer stack walking over a remote address space.

use crate::platform::{Registers, RemoteMemory};

/// Maximum frames captured per thread sample, the IP included
pub const MAX_FRAMES: usize = 5;

/// Walk the frame-pointer chain starting at `regs`.
///
/// Frame 0 is the instruction pointer; each following frame is a return
/// address read from `[fp + 8]`. The walk ends early on a null or
/// misaligned frame pointer, an unreadable or zero word, or a saved frame
/// pointer that does not move strictly up the stack, so it always
/// terminates and never fails: a broken chain just yields fewer frames.
pub fn unwind<M: RemoteMemory + ?Sized>(memory: &M, regs: Registers, max_frames: usize) -> Vec<u64> {
    let mut frames = Vec::with_capacity(max_frames);
    if max_frames == 0 {
        return frames;
    }
    frames.push(regs.ip);

    let mut fp = regs.fp;
    while frames.len() < max_frames {
        if fp == 0 || fp & 0x7 != 0 {
            break;
        }

        // Read return address at [fp + 8]
        let Some(ret_addr) = fp.checked_add(8).and_then(|addr| memory.read_word(addr)) else {
            break;
        };
        if ret_addr == 0 {
            break;
        }
        frames.push(ret_addr);

        // Saved frame pointer at [fp]; stacks grow down, so callers sit higher.
        let Some(next_fp) = memory.read_word(fp) else {
            break;
        };
        if next_fp <= fp {
            break;
        }
        fp = next_fp;
    }

    frames
}
