// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod function_indexer;
pub mod providers;
pub mod runtime_binder;

pub use function_indexer::{FunctionIndexer, IndexResults};
pub use providers::{BindingContext, BindingProvider, BindingRegistry};
pub use runtime_binder::RuntimeBinder;
