// Copyright 2025 The dynscope Authors
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

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dynscope
//!
//! Dynamic type resolution for debugger extensions: given a value observed in
//! a live or recorded process whose declared type is abstract (a protocol
//! existential, a generic type parameter, a polymorphic class reference, or
//! an indirectly-boxed enum payload), `dynscope` determines the value's true
//! runtime type and the memory location holding its data.
//!
//! ## Features
//!
//! - **Pull-based remote memory** - bounded byte reads, C string scans, and
//!   symbol resolution with an ambiguity agreement check, plus a local-buffer
//!   override for values already materialized in debugger memory
//! - **Two cooperating resolvers** - a semantic resolver over a shared
//!   type-system context, and a binary reflection resolver that answers
//!   layout questions from module metadata alone
//! - **ABI pointer fixups** - per-architecture spare-bit masking, weak and
//!   unowned reference decoding, and tagged-pointer detection
//! - **Memoization** - metadata promises (cache success, retry failure) and
//!   a member-offset cache, both keyed per context generation
//! - **Hot context replacement** - a shared/exclusive scratch lock whose
//!   writer side never blocks, and a one-shot per-module fallback mode when
//!   the shared context goes fatal
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dynscope::prelude::*;
//!
//! let runtime = LanguageRuntime::new(process);
//! let guard = runtime.scratch().read();
//! let resolved = runtime.resolve_dynamic_type_and_address(
//!     &value,
//!     DynamicValuePolicy::DynamicCanRunTarget,
//!     &guard,
//! )?;
//! println!("dynamic type at {:#x}", resolved.address);
//! # Ok::<(), dynscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`target`] - the [`target::TargetProcess`] collaborator trait and the
//!   [`target::MemoryReader`] built on top of it
//! - [`abi`] - pointer fixup constants and the pure functions applying them
//! - [`types`] - type descriptors, the shared scratch context, and value
//!   descriptors
//! - [`reflection`] - the binary reflection section parser and per-process
//!   module index
//! - [`semantic`] - the remote resolver and both memoization caches
//! - [`lock`] - the scratch cell's shared/exclusive access discipline
//! - [`runtime`] - the [`LanguageRuntime`] facade and the resolution engine
//!
//! Every resolution entry point requires the caller to hold the scratch
//! cell's shared side for the call's full duration; the engine asserts this
//! by taking the guard as a parameter and never acquires the lock itself.

pub mod abi;
mod engine;
mod error;
pub mod lock;
pub mod prelude;
pub mod reflection;
pub mod runtime;
pub mod semantic;
pub mod target;
pub mod types;

pub use engine::{DynamicValuePolicy, Resolution};
pub use error::{Error, Result};
pub use runtime::{ForeignRuntime, LanguageRuntime};
