// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

pub mod binding;
pub mod blob;
pub mod errors;
pub mod execution_log;
pub mod function_descriptor;
pub mod function_location;
pub mod function_table;
pub mod invoke;
pub mod path_template;
pub mod queue;
pub mod running_host;
pub mod table;
