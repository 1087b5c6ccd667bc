//! Command list recycling.
//!
//! A closed list holds no state worth keeping once it has been submitted: it
//! can be reset against a fresh allocator immediately. The pool is plain FIFO.

use std::collections::VecDeque;

use tracing::debug;

use crate::FrameResult;
use crate::gpu::{CommandList, Device};

pub struct CommandListPool<L> {
    lists: VecDeque<L>,
    created: usize,
}

impl<L: CommandList> CommandListPool<L> {
    pub fn new() -> Self {
        Self {
            lists: VecDeque::new(),
            created: 0,
        }
    }

    /// Returns a list open for recording into `allocator`.
    pub fn acquire<D>(&mut self, device: &D, allocator: &L::Allocator) -> FrameResult<L>
    where
        D: Device<List = L, Allocator = L::Allocator>,
    {
        match self.lists.pop_front() {
            Some(mut list) => {
                list.reset(allocator)?;
                Ok(list)
            }
            None => {
                let list = device.create_command_list(allocator)?;
                self.created += 1;
                debug!("Created command list #{}", self.created);
                Ok(list)
            }
        }
    }

    pub fn release(&mut self, list: L) {
        self.lists.push_back(list);
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn created(&self) -> usize {
        self.created
    }
}

impl<L: CommandList> Default for CommandListPool<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::CommandAllocator;
    use crate::mock::{MockEvent, MockGpu, MockList};

    #[test]
    fn test_released_list_is_reset_against_new_allocator() {
        let gpu = MockGpu::new();
        let mut pool = CommandListPool::<MockList>::new();

        let first_allocator = gpu.create_command_allocator().unwrap();
        let mut list = pool.acquire(&gpu, &first_allocator).unwrap();
        let list_id = list.id();
        list.close().unwrap();
        pool.release(list);

        let mut second_allocator = gpu.create_command_allocator().unwrap();
        second_allocator.reset().unwrap();
        let list = pool.acquire(&gpu, &second_allocator).unwrap();

        assert_eq!(list.id(), list_id);
        assert_eq!(list.allocator_id(), second_allocator.id());
        assert_eq!(pool.created(), 1);
        assert!(gpu.events().contains(&MockEvent::ListReset {
            list: list_id,
            allocator: second_allocator.id(),
        }));
    }
}
