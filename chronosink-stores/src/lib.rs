// Copyright 2025 Chronosink Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Chronosink Stores - Offset Store Implementations
//!
//! Backends for [`OffsetStore`](chronosink_core::offset::OffsetStore), where an
//! upstream source keeps its resume position between runs.
//!
//! # Available Stores
//!
//! - **Memory**: [`memory::MemoryOffsetStore`] - fast, not persistent
//! - **File**: [`file::FileOffsetStore`] - a JSON file, replaced atomically on every save

pub mod file;
pub mod memory;

pub use file::FileOffsetStore;
pub use memory::MemoryOffsetStore;
