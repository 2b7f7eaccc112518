//! # Hermes
//!
//! **A distributed document indexing and identity platform.**
//!
//! Hermes ingests documents from heterogeneous source workspaces (local
//! filesystems, hosted document suites, peer Hermes instances), assigns
//! them stable global identities, tracks every revision seen across those
//! sources, enriches them with AI summaries and vector embeddings, and
//! publishes them into a searchable catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ hermes-agent │──▶│   Admission    │──▶│    Catalog    │
//! │  scan+hash   │   │   Pipeline     │   │ SQLite + FTS5 │
//! └──────────────┘   │ identify→hash │   │   + vectors   │
//!                    │ →revise→enrich│   └───────┬───────┘
//! ┌──────────────┐   │ →index        │           │
//! │  Providers   │◀─▶└───────────────┘   ┌───────▼───────┐
//! │ fs/hosted/   │         ▲             │  Query API    │
//! │ peer         │   ┌─────┴─────┐       │ keyword/vector│
//! └──────────────┘   │ Migration │       │ /hybrid       │
//!                    │  Engine   │       └───────────────┘
//!                    └───────────┘
//! ```
//!
//! ## Deployment
//!
//! Two cooperating binaries:
//!
//! 1. **`hermesd`** — the central server owning the catalog store, the
//!    search indices, and the REST admission API.
//! 2. **`hermes-agent`** — stateless indexer agents that scan source
//!    workspaces and submit documents over HTTP.
//!
//! ```bash
//! hermesd init                   # create the catalog schema
//! hermesd serve                  # start the admission + admin API
//! hermesd status                 # inspect instance identity and backlog
//!
//! hermes-agent register          # exchange a bootstrap token for an API token
//! hermes-agent run               # heartbeat + scan/submit loops
//! hermes-agent scan --dry-run    # enumerate and hash without submitting
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy with HTTP status mapping |
//! | [`models`] | Catalog entities and wire envelope types |
//! | [`normalize`] | Content normalization and the interoperable hash |
//! | [`chunk`] | Paragraph-boundary chunker with byte spans |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Catalog schema migrations and version pinning |
//! | [`store`] | Typed catalog access layer |
//! | [`identity`] | Instance/project/document identity and revision graph |
//! | [`auth`] | Bootstrap and API token issuance and verification |
//! | [`provider`] | Workspace provider contract and routing |
//! | [`provider_fs`] | Local filesystem adapter with frontmatter round-trip |
//! | [`provider_hosted`] | Hosted document suite adapter |
//! | [`provider_peer`] | Peer Hermes instance adapter |
//! | [`ai`] | Summarize/embed interfaces, HTTP backends, vector utilities |
//! | [`index`] | Keyword and vector indices, hybrid search |
//! | [`pipeline`] | Ten-stage per-document admission pipeline |
//! | [`server`] | Admission and admin HTTP API |
//! | [`agent`] | Stateless indexer agent loops |
//! | [`migration`] | Provider-to-provider migration engine |
//! | [`reconciler`] | Background retries, outbox drain, enrichment GC |

pub mod agent;
pub mod ai;
pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod index;
pub mod migrate;
pub mod migration;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod provider_fs;
pub mod provider_hosted;
pub mod provider_peer;
pub mod reconciler;
pub mod server;
pub mod store;
