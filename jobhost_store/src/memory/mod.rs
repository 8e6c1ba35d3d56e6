// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Stores kept in the memory of the process. Clones share the same
//! content, so several hosts in one process can compete on them.

pub mod blob;
pub mod execution_log;
pub mod function_table;
pub mod host_liveness;
pub mod queue;
pub mod table;

pub use blob::MemoryBlobStore;
pub use execution_log::MemoryExecutionLog;
pub use function_table::MemoryFunctionTable;
pub use host_liveness::MemoryHostLivenessStore;
pub use queue::MemoryQueueStore;
pub use table::MemoryTableStore;
