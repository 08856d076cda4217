//! luca-script
//!
//! The LucaSystem bytecode layer: a script is a flat stream of
//! variable-length CodeLines. Decompilation walks the stream through a
//! table-driven opcode dialect and emits readable assembly with inline
//! text; re-import rebuilds a byte-identical stream, re-resolving label
//! and jump offsets after translated strings change line lengths.

pub mod codeline;
pub mod dialogue;
pub mod game;
pub mod opcode;
pub mod operator;
pub mod script;
pub mod text;

pub use game::{Game, GameOptions};
pub use opcode::{resolve_game_name, Dialect, GameProfile, OpcodeTable};
pub use script::Script;
