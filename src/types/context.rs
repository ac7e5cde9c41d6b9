// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Encoding context delivered by a device session.

use std::sync::Arc;

/// Tables a device session provides so that values can be encoded correctly.
///
/// Node identities and extension types reference namespaces and servers by
/// index; the outbound codec resolves those indices through this context.
/// The context only becomes available once the session is established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    /// Namespace table of the server, indexed by namespace index.
    pub namespace_uris: Vec<String>,
    /// Server table, indexed by server index.
    pub server_uris: Vec<String>,
    /// URL of the endpoint the session is connected to.
    pub endpoint_url: String,
}

impl MessageContext {
    /// Creates a context for an endpoint with the standard namespace only.
    #[must_use]
    pub fn for_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            namespace_uris: vec!["http://opcfoundation.org/UA/".to_string()],
            server_uris: Vec::new(),
            endpoint_url: endpoint_url.into(),
        }
    }

    /// Resolves a namespace index to its URI.
    #[must_use]
    pub fn namespace_uri(&self, index: usize) -> Option<&str> {
        self.namespace_uris.get(index).map(String::as_str)
    }
}

/// Shared handle to a context; contexts are immutable once published.
pub type SharedContext = Arc<MessageContext>;
