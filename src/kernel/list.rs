//! Forward traversal of singly linked kernel structures
use crate::core::offsets::StructLayout;
use crate::error::AnalysisError;
use crate::kernel::object::{Object, Vm};
use crate::memory::Address;
use log::{debug, warn};

pub const DEFAULT_LIST_LIMIT: usize = 10_000;

/// Lazy walk over `struct_name` nodes linked through `next_member`.
///
/// Each `next` pointer is taken as the start of another `struct_name`. The walk
/// ends at a null or unreadable pointer, or after `limit` nodes. Cycles are not
/// detected; the limit is what ends them.
#[derive(Clone)]
pub struct ListWalk<'a> {
    vm: Vm<'a>,
    layout: &'a StructLayout,
    next_member: String,
    current: Option<Address>,
    steps: usize,
    limit: usize,
    truncated: bool,
}

/// Start a walk at `start`. The struct and member are checked up front.
pub fn walk_internal_list<'a>(
    vm: Vm<'a>,
    struct_name: &str,
    next_member: &str,
    start: Option<Address>,
) -> Result<ListWalk<'a>, AnalysisError> {
    let layout = vm.layouts.layout(struct_name)?;
    vm.layouts.member_offset(struct_name, next_member)?;

    Ok(ListWalk {
        vm,
        layout,
        next_member: next_member.to_string(),
        current: start.filter(|&addr| addr != 0),
        steps: 0,
        limit: DEFAULT_LIST_LIMIT,
        truncated: false,
    })
}

impl<'a> ListWalk<'a> {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The walk stopped because it hit its step limit
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for ListWalk<'a> {
    type Item = Object<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.current?;

        if self.steps >= self.limit {
            warn!(
                "Walk of {}.{} stopped after {} nodes; list may be corrupt or cyclic",
                self.layout.name(),
                self.next_member,
                self.limit
            );
            self.truncated = true;
            self.current = None;
            return None;
        }
        self.steps += 1;

        let node = self.vm.object(self.layout.name(), address).ok()?;
        self.current = match node.pointer(&self.next_member) {
            Ok(next) => next,
            Err(e) => {
                debug!("List walk ends at 0x{:x}: {}", address, e);
                None
            }
        };
        Some(node)
    }
}
