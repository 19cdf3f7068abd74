//! Sandboxed smart contracts
//!
//! Contracts are small programs in a brace-delimited statement language:
//!
//! ```text
//! # count calls per sender
//! key = "calls:" + sender;
//! state[key] = state.get(key, 0) + 1;
//! if blockchain.get_balance(sender) >= params["min"] {
//!     result = state[key];
//! }
//! ```
//!
//! A running contract can see only `blockchain` (`get_balance`,
//! `get_block_number`), a copy of `params`, its own `state`, `sender`,
//! `now()` and the builtins `len`, `str`, `num`.
//!
//! Validation is two-phase: the source must parse, and then the raw text must
//! not contain any substring in [`DENYLIST`]. The denylist is a textual screen,
//! not isolation; it rejects harmless names like `profile` and can be dodged
//! by anything that does not spell a banned token literally.
//!
//! Because parsing comes first, source that is not in this language at all is
//! a `ContractSyntaxError` even when it also spells a banned token. `import os`
//! is a syntax error here, not a `ContractSecurityViolation("import")`; the
//! denylist only fires for banned text inside a program that parses, such as
//! `x = 1; # import`.

pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod sandbox;

pub use sandbox::{
    validate_source, ChainSnapshotView, ContractOutcome, ContractRegistry, LedgerReader,
    SmartContract, DENYLIST,
};
