// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::binding::FunctionDefinition;
use crate::errors::StoreError;

/// Persistence of indexed functions, keyed by the location string.
///
/// Every call affects a single entry, so readers never see a function
/// half-updated.
#[async_trait::async_trait]
pub trait FunctionTableStore: Send + Sync {
    async fn lookup(&self, function_id: &str) -> Result<Option<FunctionDefinition>, StoreError>;

    async fn read_all(&self) -> Result<Vec<FunctionDefinition>, StoreError>;

    /// Insert or replace the entry of the definition's location.
    async fn add(&self, definition: FunctionDefinition) -> Result<(), StoreError>;

    async fn delete(&self, definition: &FunctionDefinition) -> Result<(), StoreError>;
}
