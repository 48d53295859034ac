/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! The on-wire layout of a task record inside the shared segment. Records are
//! fixed size and little-endian so that every process attached to the segment
//! reads the same bytes the same way.

use byteorder::{ByteOrder, LittleEndian};

/// Size of the description field, including the terminating null byte.
pub const DESC_LEN: usize = 256;

/// Total size of one record slot in the ring.
///
/// id (4) + priority (4) + description (256) + kind (1) + completed (1) +
/// remaining_ms (4).
pub const RECORD_LEN: usize = 270;

const ID_OFF: usize = 0;
const PRIORITY_OFF: usize = 4;
const DESC_OFF: usize = 8;
const KIND_OFF: usize = 264;
const COMPLETED_OFF: usize = 265;
const REMAINING_OFF: usize = 266;

/// Closed tag distinguishing the task variants a record can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    CpuIntensive,
    IoBound,
    Generic,
}

impl TaskKind {
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            TaskKind::CpuIntensive => 0,
            TaskKind::IoBound => 1,
            TaskKind::Generic => 2,
        }
    }

    /// Decodes a tag byte. Records survive process restarts, so an unknown
    /// tag decodes as `Generic` rather than failing the dequeue.
    #[inline]
    pub fn from_tag(tag: u8) -> TaskKind {
        match tag {
            0 => TaskKind::CpuIntensive,
            1 => TaskKind::IoBound,
            _ => TaskKind::Generic,
        }
    }
}

/// One serialized task as it sits in a ring slot. The description doubles as
/// a parameter carrier for some variants (an I/O-bound record stores its
/// output path there).
#[derive(Clone, Debug, PartialEq)]
pub struct TaskRecord {
    pub id: i32,
    pub priority: i32,
    pub description: String,
    pub kind: TaskKind,
    pub completed: bool,
    pub remaining_ms: i32,
}

impl TaskRecord {
    /// Serializes the record into a ring slot. The description is truncated
    /// to 255 bytes and null-terminated; the remainder of the field is
    /// zeroed so slots compare byte-for-byte.
    pub fn write_to(&self, slot: &mut [u8]) {
        assert!(slot.len() >= RECORD_LEN);

        LittleEndian::write_i32(&mut slot[ID_OFF..ID_OFF + 4], self.id);
        LittleEndian::write_i32(&mut slot[PRIORITY_OFF..PRIORITY_OFF + 4], self.priority);

        let desc = self.description.as_bytes();
        let visible = desc.len().min(DESC_LEN - 1);
        slot[DESC_OFF..DESC_OFF + visible].copy_from_slice(&desc[..visible]);
        for byte in slot[DESC_OFF + visible..DESC_OFF + DESC_LEN].iter_mut() {
            *byte = 0;
        }

        slot[KIND_OFF] = self.kind.tag();
        slot[COMPLETED_OFF] = self.completed as u8;
        LittleEndian::write_i32(&mut slot[REMAINING_OFF..REMAINING_OFF + 4], self.remaining_ms);
    }

    /// Deserializes a record from a ring slot.
    pub fn read_from(slot: &[u8]) -> TaskRecord {
        assert!(slot.len() >= RECORD_LEN);

        let desc = &slot[DESC_OFF..DESC_OFF + DESC_LEN];
        let visible = desc.iter().position(|&b| b == 0).unwrap_or(DESC_LEN - 1);

        TaskRecord {
            id: LittleEndian::read_i32(&slot[ID_OFF..ID_OFF + 4]),
            priority: LittleEndian::read_i32(&slot[PRIORITY_OFF..PRIORITY_OFF + 4]),
            description: String::from_utf8_lossy(&desc[..visible]).into_owned(),
            kind: TaskKind::from_tag(slot[KIND_OFF]),
            completed: slot[COMPLETED_OFF] != 0,
            remaining_ms: LittleEndian::read_i32(&slot[REMAINING_OFF..REMAINING_OFF + 4]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskRecord {
        TaskRecord {
            id: 7,
            priority: -3,
            description: "I/O-bound task: /tmp/out.txt".to_string(),
            kind: TaskKind::IoBound,
            completed: false,
            remaining_ms: 42,
        }
    }

    #[test]
    fn record_round_trips() {
        let record = sample();
        let mut slot = [0u8; RECORD_LEN];
        record.write_to(&mut slot);
        assert_eq!(TaskRecord::read_from(&slot), record);
    }

    #[test]
    fn long_description_is_truncated() {
        let mut record = sample();
        record.description = "x".repeat(1000);
        let mut slot = [0u8; RECORD_LEN];
        record.write_to(&mut slot);

        let decoded = TaskRecord::read_from(&slot);
        assert_eq!(decoded.description.len(), DESC_LEN - 1);
        assert_eq!(slot[DESC_OFF + DESC_LEN - 1], 0);
    }

    #[test]
    fn stale_slot_bytes_are_overwritten() {
        let mut slot = [0xffu8; RECORD_LEN];
        let record = sample();
        record.write_to(&mut slot);
        assert_eq!(TaskRecord::read_from(&slot), record);

        // A slot written twice with the same record is byte-identical.
        let mut other = [0u8; RECORD_LEN];
        record.write_to(&mut other);
        assert_eq!(slot[..], other[..]);
    }

    #[test]
    fn unknown_kind_decodes_as_generic() {
        let mut slot = [0u8; RECORD_LEN];
        sample().write_to(&mut slot);
        slot[KIND_OFF] = 0x7f;
        assert_eq!(TaskRecord::read_from(&slot).kind, TaskKind::Generic);
    }
}
