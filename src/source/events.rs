// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The source-side events the relay engine consumes. The source
//! platform's gateway connection itself is out of this bridge's scope; these
//! variants are what a connected session hands off after decoding its own
//! dispatch opcodes.

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum SourceEvent {
    MessageCreate(Value),
    MessageUpdate(Value),
    MessageDelete { id: String, channel_id: String },
}
