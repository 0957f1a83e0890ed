// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bidirectional message bridge and migration engine between a Discord-shaped
//! source platform and a Revolt/Stoat-shaped target platform.

pub mod archive;
pub mod config;
pub mod echo_guard;
pub mod errors;
pub mod migration;
pub mod model;
pub mod push;
pub mod recovery;
pub mod relay;
pub mod source;
pub mod store;
pub mod target;
