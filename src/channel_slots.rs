use crate::errors::*;
use indexmap::IndexSet;
use snafu::OptionExt;
use std::collections::hash_map::{Entry, HashMap};

// Channel numbers handed out by a session. Numbers count up from 1; a closed channel's number
// is only reused once every number up to channel_max has been handed out.
pub(crate) struct ChannelSlots<T> {
    slots: HashMap<u16, T>,
    freed_channel_ids: IndexSet<u16>,
    next_channel_id: u16,
    channel_max: u16,
}

impl<T> ChannelSlots<T> {
    pub(crate) fn new() -> ChannelSlots<T> {
        ChannelSlots {
            slots: HashMap::new(),
            freed_channel_ids: IndexSet::new(),
            next_channel_id: 1,
            channel_max: u16::max_value(),
        }
    }

    pub(crate) fn set_channel_max(&mut self, channel_max: u16) {
        self.channel_max = channel_max;
    }

    pub(crate) fn get(&self, channel_id: u16) -> Option<&T> {
        self.slots.get(&channel_id)
    }

    pub(crate) fn get_mut(&mut self, channel_id: u16) -> Option<&mut T> {
        self.slots.get_mut(&channel_id)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.values_mut()
    }

    pub(crate) fn remove(&mut self, channel_id: u16) -> Option<T> {
        let entry = self.slots.remove(&channel_id)?;
        self.freed_channel_ids.insert(channel_id);
        Some(entry)
    }

    // Reserve the next channel number; make_entry runs with the number before it is recorded,
    // so a failed open leaves the number unused.
    pub(crate) fn insert<F>(&mut self, make_entry: F) -> Result<u16>
    where
        F: FnOnce(u16) -> Result<T>,
    {
        while self.next_channel_id != 0 && self.next_channel_id <= self.channel_max {
            let channel_id = self.next_channel_id;
            self.next_channel_id = self.next_channel_id.wrapping_add(1);
            if let Entry::Vacant(entry) = self.slots.entry(channel_id) {
                match make_entry(channel_id) {
                    Ok(t) => {
                        entry.insert(t);
                        return Ok(channel_id);
                    }
                    Err(err) => {
                        // hand the same number out next time
                        self.next_channel_id = channel_id;
                        return Err(err);
                    }
                }
            }
        }

        // Out of fresh numbers; fall back to one that has been freed.
        let channel_id = self
            .freed_channel_ids
            .pop()
            .context(ExhaustedChannelIdsSnafu)?;
        match make_entry(channel_id) {
            Ok(t) => {
                self.slots.insert(channel_id, t);
                Ok(channel_id)
            }
            Err(err) => {
                self.freed_channel_ids.insert(channel_id);
                Err(err)
            }
        }
    }
}
