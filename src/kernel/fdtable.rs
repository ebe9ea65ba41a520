//! Open file descriptors of a task (`task->files->fdt`)
use crate::error::AnalysisError;
use crate::kernel::object::Vm;
use crate::memory::Address;
use log::{debug, warn};

/// Upper bound on `max_fds`; larger values are treated as corruption
pub const MAX_FDS_LIMIT: u64 = 1 << 20;

/// `(fd, struct file address)` for every non-null slot of the task's fd array
pub fn open_files(vm: Vm<'_>, task: Address) -> Result<Vec<(u32, Address)>, AnalysisError> {
    let task = vm.object("task_struct", task)?;
    let Some(files) = task.deref_as("files", "files_struct")? else {
        debug!("Task at 0x{:x} has no files_struct", task.offset());
        return Ok(Vec::new());
    };
    let Some(fdt) = files.deref_as("fdt", "fdtable")? else {
        return Ok(Vec::new());
    };

    let mut max_fds = u64::from(fdt.read_u32("max_fds")?);
    if max_fds > MAX_FDS_LIMIT {
        warn!(
            "fdtable at 0x{:x} claims {} descriptors, reading the first {}",
            fdt.offset(),
            max_fds,
            MAX_FDS_LIMIT
        );
        max_fds = MAX_FDS_LIMIT;
    }
    let Some(fd_array) = fdt.pointer("fd")? else {
        return Ok(Vec::new());
    };

    let pointer_size = vm.space.arch().pointer_size() as u64;
    let mut open = Vec::new();
    for fd in 0..max_fds {
        let slot = fd_array.wrapping_add(fd * pointer_size);
        match vm.space.read_pointer(slot) {
            Some(0) => {}
            Some(file) => open.push((fd as u32, file)),
            None => {
                debug!("fd array unreadable at slot {} (0x{:x})", fd, slot);
                break;
            }
        }
    }
    Ok(open)
}
