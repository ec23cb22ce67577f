/*! An optimizer for the bytecode of a backtracking regular-expression
virtual machine.

The front end compiles a pattern into a flat [`Program`]: a sequence of
instruction words plus a side table of literal strings. This crate takes
that finished program and rewrites it into a semantically equivalent,
faster one — dead control flow removed, literal runs merged, eligible
loops made atomic, `.*`-anchor scans turned into seeks — and extracts
[`OptimizationData`], a cheap pre-filter the execution engine consults
before running bytecode. Parsing, general code generation and the VM
itself live elsewhere; the two code generators that do live here, the
[alternation compiler](append_alternation) and the
[character-class compiler](append_character_class), are shared with the
front end because their output quality decides what the passes can do
later.

# Example

```rust
use rebolt::{optimize, Program};

// The bytecode for /abc/: three literal compares.
let mut program = Program::new();
program.emit_compare_char('a' as u32);
program.emit_compare_char('b' as u32);
program.emit_compare_char('c' as u32);

let (_, data) = optimize(program);

// A pure literal pattern is demoted to a substring search.
assert_eq!(data.pure_substring_search.as_deref(), Some("abc"));
```
*/

use thiserror::Error;

pub mod chardata;
pub mod compare;
pub mod instr;
pub mod optimizer;
pub mod program;

#[cfg(test)]
mod tests;

pub use compare::{
    CharClass, CharRange, CompareOperand, LookupTable, Property,
};
pub use instr::{BoundaryKind, ForkCondition, Instr, Offset, Word};
pub use optimizer::{
    append_alternation, append_alternation_pair, append_character_class,
    optimize, OptimizationData, Optimizer,
};
pub use program::{opcode_name, Program, StringTable};

/// Maximum number of alternatives in one alternation (e.g.
/// `foo|bar|baz…`).
pub const MAX_ALTERNATIVES: usize = 255;

/// Errors reported by the compile-side entry points. Everything else that
/// can go wrong here is an upstream bug and panics with the program state
/// attached.
#[derive(Error, Debug)]
pub enum Error {
    /// The alternation has more branches than [`MAX_ALTERNATIVES`].
    #[error("too many alternatives in alternation (max: 255)")]
    TooManyAlternatives,
}
