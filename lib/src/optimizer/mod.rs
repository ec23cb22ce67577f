/*!
The optimizer: takes a compiled program and rewrites it into a
semantically equivalent, faster one.

The six passes run once, in a fixed order, and the basic-block list is
re-derived before each of them — every edit moves addresses, and a stale
block list is never trusted. After the passes a final walk over the first
basic block extracts the cheap pre-filter metadata (anchoring, possible
starting code points) the execution engine uses to skip hopeless match
attempts.
*/

use serde::{Deserialize, Serialize};

mod alternation;
mod blocks;
mod class;
mod compares;
mod passes;
mod rewriter;

#[cfg(test)]
mod tests;

pub use alternation::{append_alternation, append_alternation_pair};
pub use class::append_character_class;

use crate::chardata::to_ascii_lowercase;
use crate::compare::{self, CharRange};
use crate::instr::Instr;
use crate::program::Program;
use blocks::Block;
use compares::InterpretedCompares;

/// Metadata extracted from the optimized program, used by the execution
/// engine as a cheap pre-filter — never as a substitute for running the
/// bytecode.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationData {
    /// When present, the whole pattern is a literal substring search for
    /// these code units and the runtime must use it instead of general
    /// bytecode execution.
    pub pure_substring_search: Option<String>,
    /// True if a match can only start at the start of a line.
    pub anchored_to_line_start: bool,
    /// Code-point ranges a match could possibly start on, sorted.
    pub starting_ranges: Vec<CharRange>,
    /// ASCII-lowercased counterparts of `starting_ranges`, sorted.
    pub starting_ranges_insensitive: Vec<CharRange>,
}

/// Runs the optimization passes over one compiled program.
pub struct Optimizer {
    program: Program,
    /// The pattern source text; used in diagnostics only.
    pattern: String,
}

impl Optimizer {
    /// Creates an optimizer for `program`.
    pub fn new(program: Program) -> Self {
        Self { program, pattern: String::new() }
    }

    /// Creates an optimizer that reports `pattern` in diagnostics.
    pub fn with_pattern(program: Program, pattern: &str) -> Self {
        Self { program, pattern: pattern.to_string() }
    }

    /// Runs all passes and returns the rewritten program together with
    /// the extracted metadata.
    pub fn run(mut self) -> (Program, OptimizationData) {
        let mut data = OptimizationData::default();

        self.program =
            passes::remove_useless_jumps(self.program, &self.pattern);

        let blocks = blocks::split_basic_blocks(&self.program);
        if let Some(units) =
            passes::as_substring_search(&self.program, &blocks)
        {
            data.pure_substring_search = Some(units);
            return (self.program, data);
        }

        // Rewrite fork loops as atomic groups, e.g. a*b -> (?>a*)b.
        let blocks = blocks::split_blocks_for_atomic_groups(&self.program);
        passes::rewrite_loops_as_atomic_groups(
            &mut self.program,
            &blocks,
            &self.pattern,
        );

        // Join adjacent single-character compares into string compares.
        let blocks = blocks::split_basic_blocks(&self.program);
        self.program = passes::merge_adjacent_char_compares(
            self.program,
            &blocks,
            &self.pattern,
        );

        // Rewrite /.*x/ as a seek to x.
        let blocks = blocks::split_basic_blocks(&self.program);
        self.program = passes::rewrite_dot_star_as_seek(
            self.program,
            &blocks,
            &self.pattern,
        );

        // Simplify compares where possible.
        let blocks = blocks::split_basic_blocks(&self.program);
        self.program = passes::simplify_single_operand_compares(
            self.program,
            &blocks,
            &self.pattern,
        );

        let blocks = blocks::split_basic_blocks(&self.program);
        fill_optimization_data(&self.program, &blocks, &mut data);

        (self.program, data)
    }
}

/// Convenience wrapper: optimizes `program` with default settings.
pub fn optimize(program: Program) -> (Program, OptimizationData) {
    Optimizer::new(program).run()
}

/// Walks the first basic block, looking through bookkeeping instructions:
/// a leading start-of-line check records the anchor; a leading compare
/// that interprets to plain ranges records the possible starting code
/// points. Any class, negation or Unicode-property content aborts the
/// extraction — running the bytecode is then the only answer.
fn fill_optimization_data(
    program: &Program,
    blocks: &[Block],
    data: &mut OptimizationData,
) {
    let Some(block) = blocks.first() else { return };

    let mut ip = block.start;
    while ip <= block.end {
        let (instr, width) = program.instr_at(ip);
        match instr {
            Instr::Compare(args) | Instr::CompareSimple(args) => {
                if args.argc == 0 {
                    // Matches nothing; no starting range can satisfy it.
                    return;
                }
                let ops = compare::decode_operands(args.args);
                let mut compares = InterpretedCompares::default();
                if !compares::interpret_compares(
                    &ops,
                    &mut compares,
                    None,
                    false,
                ) {
                    // No idea, the bytecode is too complex.
                    return;
                }
                if compares.has_any_unicode_property {
                    // Faster to just run the bytecode.
                    return;
                }
                if !compares.char_classes.is_empty()
                    || !compares.negated_char_classes.is_empty()
                    || !compares.negated_ranges.is_empty()
                {
                    return;
                }
                for (&from, &to) in &compares.ranges {
                    data.starting_ranges.push(CharRange::new(from, to));
                    data.starting_ranges_insensitive.push(CharRange::new(
                        to_ascii_lowercase(from),
                        to_ascii_lowercase(to),
                    ));
                }
                data.starting_ranges_insensitive
                    .sort_by_key(|range| range.from);
                return;
            }
            Instr::CheckBegin => {
                data.anchored_to_line_start = true;
                return;
            }
            _ if instr.is_bookkeeping() => {
                // These do not match anything; look through them.
                ip += width;
            }
            _ => return,
        }
    }
}
