// Copyright 2025 meshroute Authors
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

//! # meshroute CLI
//!
//! Command-line inspector for meshroute routing decisions.
//!
//! The CLI loads a property dump (the cluster, service and uri properties a
//! coordination store would publish) into a local load balancer state and
//! answers questions about it:
//!
//! - **Partitions**: which hosts serve which partition, with ring shares
//! - **Ring**: the point distribution of one partition's hash ring
//! - **Key mapping**: where a set of keys would be sent
//! - **Resolve**: the host and rewritten URI for a single request
//!
//! ## Architecture
//!
//! The binary parses arguments with `argh` and prints the reports built in
//! [`inspect`] as JSON on stdout, so the output pipes into `jq`.

pub mod inspect;
