/*!
Alternation compiler.

Given N branch programs, produces one program that tries them in declared
order (first match wins). Two layouts are possible:

* a plain fork chain: one fork per branch, branches laid out sequentially;
* a prefix trie: branches that share a prefix of identical instructions
  share the emitted code for it, with per-branch forks where they diverge.

Instructions are only merged when both their bytes and the bytes of every
jump targeting them are identical, so structurally identical instructions
reached from different predecessors are never conflated — merging them
would corrupt backtrack order. The trie is used only when it is legal
(sharing never reorders branches whose compare sets might overlap) and
estimated cheaper than the chain.
*/

use std::collections::{BTreeMap, VecDeque};

use indexmap::IndexMap;
use log::*;
use rustc_hash::FxHashMap;

use super::compares::{self, InterpretedCompares};
use crate::compare;
use crate::instr::{
    decode_instr, jump_slot, ForkCondition, Instr, Word,
};
use crate::program::{remap_strings, Program};
use crate::{Error, MAX_ALTERNATIVES};

/// Address of one instruction inside one branch. Used to distinguish
/// structurally identical instructions coming from different branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QualifiedIp {
    branch: usize,
    ip: usize,
}

struct TrieEntry {
    ip: QualifiedIp,
    /// Interpreted sets of the first compare reachable from this entry,
    /// `None` when the compare cannot be interpreted (which always counts
    /// as overlapping).
    first_compare: Option<InterpretedCompares>,
}

struct TrieNode {
    /// The instruction words this node emits; empty for the root.
    insn: Vec<Word>,
    /// Children keyed by `(instruction bytes, incoming-jump bytes)`, in
    /// insertion order — which is branch order, the order forks must be
    /// emitted in.
    children: IndexMap<Vec<Word>, usize>,
    /// Which `(branch, address)` pairs reached this node.
    entries: Vec<TrieEntry>,
}

/// Appends bytecode matching `left`, or failing that `right`, to `target`.
pub fn append_alternation_pair(
    target: &mut Program,
    left: Program,
    right: Program,
) -> Result<(), Error> {
    append_alternation(target, vec![left, right])
}

/// Appends bytecode trying every alternative in declared order to
/// `target`; the first alternative that matches wins.
pub fn append_alternation(
    target: &mut Program,
    mut alternatives: Vec<Program>,
) -> Result<(), Error> {
    match alternatives.len() {
        0 => return Ok(()),
        1 => {
            target.append_program(alternatives.pop().unwrap());
            return Ok(());
        }
        n if n > MAX_ALTERNATIVES => {
            return Err(Error::TooManyAlternatives)
        }
        _ => {}
    }

    // Merge every side table into the target up front: identical literal
    // operands from different branches must end up byte-identical, or the
    // trie could never share them.
    for alt in &mut alternatives {
        let remap = target.strings.merge_from(&alt.strings);
        remap_strings(&mut alt.code, &remap);
        target.capture_groups =
            target.capture_groups.max(alt.capture_groups);
    }

    if alternatives.iter().all(|alt| alt.is_empty()) {
        return Ok(());
    }

    // A trailing zero-offset jump gives every branch an explicit end
    // address for the trie to hang patches on. Useless-jump removal
    // cleans the survivors up later.
    for alt in &mut alternatives {
        alt.push(Instr::JUMP);
        alt.push(0);
    }

    // Find incoming jump edges per branch. Needed both to keep the trie
    // from merging instructions with different predecessors and to know
    // which jumps to patch when emitting.
    let mut incoming_edges: Vec<FxHashMap<usize, Vec<(usize, usize)>>> =
        Vec::with_capacity(alternatives.len());
    let mut has_any_backwards_jump = false;
    for alt in &alternatives {
        let mut edges: FxHashMap<usize, Vec<(usize, usize)>> =
            FxHashMap::default();
        let code = alt.as_words();
        let mut addr = 0;
        while addr < code.len() {
            let (instr, width) = decode_instr(code, addr);
            if let Some(edge_target) = instr.jump_target(addr, width) {
                edges.entry(edge_target).or_default().push((addr, width));
                has_any_backwards_jump |= edge_target <= addr;
            }
            addr += width;
        }
        incoming_edges.push(edges);
    }

    // Build the trie: one node per unique (instruction bytes, incoming
    // jump bytes) prefix path across all branches.
    let mut nodes: Vec<TrieNode> = vec![TrieNode {
        insn: Vec::new(),
        children: IndexMap::new(),
        entries: Vec::new(),
    }];
    let mut total_nodes = 0usize;
    let mut common_hits = 0usize;
    for (branch, alt) in alternatives.iter().enumerate() {
        let code = alt.as_words();
        let edges = &incoming_edges[branch];
        let mut active = 0usize;
        let mut addr = 0;
        while addr < code.len() {
            let (_, width) = decode_instr(code, addr);
            total_nodes += 1;

            let mut key = code[addr..addr + width].to_vec();
            if let Some(edge_list) = edges.get(&addr) {
                for &(edge_addr, edge_width) in edge_list {
                    key.extend_from_slice(
                        &code[edge_addr..edge_addr + edge_width],
                    );
                }
            }

            let child = match nodes[active].children.get(&key) {
                Some(&id) => id,
                None => {
                    let id = nodes.len();
                    nodes.push(TrieNode {
                        insn: code[addr..addr + width].to_vec(),
                        children: IndexMap::new(),
                        entries: Vec::new(),
                    });
                    nodes[active].children.insert(key, id);
                    id
                }
            };
            if !nodes[child].entries.is_empty() {
                common_hits += 1;
            }
            nodes[child].entries.push(TrieEntry {
                ip: QualifiedIp { branch, ip: addr },
                first_compare: first_compare_from(alt, addr),
            });
            active = child;
            addr += width;
        }
    }

    // Cost estimate, in words: the chain pays every branch in full plus a
    // linking fork per branch; the trie pays two words of fork linkage
    // per non-shared node.
    let chain_cost: usize =
        alternatives.iter().map(|alt| alt.len()).sum::<usize>()
            + alternatives.len() * 2;
    let tree_cost = (total_nodes - common_hits) * 2;

    let legal = trie_preserves_order(&nodes);
    trace!(
        "alternation: {} nodes, {} shared (tree cost {}, chain cost {}, \
         order-preserving: {})",
        total_nodes,
        common_hits,
        tree_cost,
        chain_cost,
        legal
    );

    if common_hits == 0 || !legal || tree_cost > chain_cost {
        debug!("alternation: sequential layout");
        emit_chain(target, &alternatives);
    } else {
        debug!("alternation: trie layout");
        emit_trie(
            target,
            &alternatives,
            &nodes,
            has_any_backwards_jump,
        );
    }
    Ok(())
}

/// Interprets the first compare reachable from `ip`, looking through
/// bookkeeping instructions. `None` means a compare was found but could
/// not be interpreted; a node with no reachable compare gets empty sets.
fn first_compare_from(
    alt: &Program,
    mut ip: usize,
) -> Option<InterpretedCompares> {
    loop {
        let (instr, width) = alt.instr_at(ip);
        if instr.is_bookkeeping() {
            ip += width;
            continue;
        }
        let mut compares = InterpretedCompares::default();
        if let Instr::Compare(args) = instr {
            let ops = compare::decode_operands(args.args);
            if !compares::interpret_compares(&ops, &mut compares, None, false)
            {
                return None;
            }
        }
        return Some(compares);
    }
}

/// Checks the order requirement: `a` must be tried before `b` in `a|b`.
/// Sharing is illegal when a shared node's children put a later branch
/// before an earlier one, unless the two entries' compare sets are proven
/// disjoint (then the order cannot matter).
fn trie_preserves_order(nodes: &[TrieNode]) -> bool {
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(0);
    while let Some(id) = queue.pop_front() {
        let node = &nodes[id];
        for &child in node.children.values() {
            queue.push_back(child);
        }
        if node.children.len() <= 1 {
            continue;
        }

        let mut max_branch = 0usize;
        let mut max_entry: Option<&TrieEntry> = None;
        for &child in node.children.values() {
            for entry in &nodes[child].entries {
                if max_branch > entry.ip.branch {
                    let disjoint = match (
                        max_entry.and_then(|e| e.first_compare.as_ref()),
                        entry.first_compare.as_ref(),
                    ) {
                        (Some(a), Some(b)) => !compares::sets_overlap(a, b),
                        // Uninterpretable compares are never proven
                        // disjoint.
                        _ => false,
                    };
                    if disjoint {
                        continue;
                    }
                    return false;
                }
                max_branch = entry.ip.branch;
                max_entry = Some(entry);
            }
        }
    }
    true
}

/// Sequential layout: a fork per branch (conditional when the branch
/// starts with a start-of-line check), branches laid out with jumps to a
/// common end label.
fn emit_chain(target: &mut Program, alternatives: &[Program]) {
    let n = alternatives.len();

    // A branch leading with a start-of-line assertion can lift it into
    // the fork itself.
    let starts_at_line_start: Vec<bool> = alternatives
        .iter()
        .map(|alt| matches!(alt.instr_at(0).0, Instr::CheckBegin))
        .collect();

    let mut fork_pos = vec![0usize; n - 1];
    let mut fork_width = vec![0usize; n - 1];
    for branch in 0..n - 1 {
        fork_pos[branch] = target.len();
        if starts_at_line_start[branch] {
            fork_width[branch] = 4;
            target.extend_from_slice(&[
                Instr::FORK_IF,
                0, // patched below
                Instr::FORK_JUMP,
                ForkCondition::AtStartOfLine as Word,
            ]);
        } else {
            fork_width[branch] = 2;
            target.extend_from_slice(&[Instr::FORK_JUMP, 0]);
        }
    }

    let mut end_jump_slots = vec![0usize; n];
    for branch in (0..n).rev() {
        if branch < n - 1 {
            let start = target.len();
            target.code[fork_pos[branch] + 1] =
                (start - fork_pos[branch] - fork_width[branch]) as Word;
        }
        target.extend_from_slice(alternatives[branch].as_words());
        target.push(Instr::JUMP);
        target.push(0); // to the end label
        end_jump_slots[branch] = target.len() - 1;
    }

    let end = target.len();
    for slot in end_jump_slots {
        target.code[slot] = (end - (slot + 1)) as Word;
    }
}

struct Patch {
    source: QualifiedIp,
    /// Word index of the offset placeholder to fill in.
    slot: usize,
    /// Address and width of the instruction owning the placeholder.
    insn_addr: usize,
    insn_width: usize,
    done: bool,
}

/// Trie layout: each node's instruction is emitted once, followed by a
/// fork per child. Forward jumps are patched when their target node is
/// visited; backward jumps resolve through a per-branch address map,
/// which is legal because each branch's nodes are walked in order.
fn emit_trie(
    target: &mut Program,
    alternatives: &[Program],
    nodes: &[TrieNode],
    has_any_backwards_jump: bool,
) {
    let mut patches: Vec<Patch> = Vec::new();
    let mut ip_maps: FxHashMap<usize, BTreeMap<usize, usize>> =
        FxHashMap::default();

    let mut worklist: Vec<usize> = vec![0];
    while let Some(id) = worklist.pop() {
        let node = &nodes[id];

        // Resolve pending forward patches that lead here.
        let here = target.len();
        for patch in &mut patches {
            if patch.done {
                continue;
            }
            if node.entries.iter().any(|e| e.ip == patch.source) {
                apply_patch(target, patch, here);
            }
        }

        if !node.insn.is_empty() {
            let node_addr = target.len();
            target.extend_from_slice(&node.insn);

            if has_any_backwards_jump {
                for entry in &node.entries {
                    ip_maps
                        .entry(entry.ip.branch)
                        .or_default()
                        .insert(entry.ip.ip, node_addr);
                }
            }

            if let Some(desc) = jump_slot(node.insn[0]) {
                let width = node.insn.len();
                let raw_offset = node.insn[desc.slot] as i64;
                let multiple = node.entries.len() > 1;
                if multiple {
                    // Shared jump: fall through here, then fork once per
                    // entry.
                    target.code[node_addr + desc.slot] = 0;
                }

                for entry in &node.entries {
                    let old_target = if desc.backward {
                        entry.ip.ip - raw_offset as usize
                    } else {
                        (entry.ip.ip as i64 + width as i64 + raw_offset)
                            as usize
                    };

                    let (slot, insn_addr, insn_width, negate);
                    if multiple {
                        let fork_addr = target.len();
                        target
                            .extend_from_slice(&[Instr::FORK_JUMP, 0]);
                        slot = fork_addr + 1;
                        insn_addr = fork_addr;
                        insn_width = 2;
                        negate = false;
                    } else {
                        slot = node_addr + desc.slot;
                        insn_addr = node_addr;
                        insn_width = width;
                        negate = desc.backward;
                    }

                    if desc.backward || raw_offset < 0 {
                        // The target has necessarily been emitted
                        // already; resolve it now.
                        let new_target = ip_maps
                            .get(&entry.ip.branch)
                            .and_then(|map| map.get(&old_target))
                            .copied()
                            .unwrap_or_else(|| {
                                panic!(
                                    "alternation trie: unknown backwards \
                                     jump {}@{} -> {}",
                                    entry.ip.ip,
                                    entry.ip.branch,
                                    old_target
                                )
                            });
                        let value = if negate {
                            insn_addr as i64 - new_target as i64
                        } else {
                            new_target as i64
                                - insn_addr as i64
                                - insn_width as i64
                        };
                        target.code[slot] = value as Word;
                    } else {
                        patches.push(Patch {
                            source: QualifiedIp {
                                branch: entry.ip.branch,
                                ip: old_target,
                            },
                            slot,
                            insn_addr,
                            insn_width,
                            done: false,
                        });
                    }
                }
            }
        }

        for &child in node.children.values() {
            let fork_addr = target.len();
            target.extend_from_slice(&[Instr::FORK_JUMP, 0]);
            let first = &nodes[child].entries[0];
            patches.push(Patch {
                source: first.ip,
                slot: fork_addr + 1,
                insn_addr: fork_addr,
                insn_width: 2,
                done: false,
            });
            worklist.push(child);
        }
    }

    let end = target.len();
    for patch in &mut patches {
        if patch.done {
            continue;
        }
        if patch.source.ip >= alternatives[patch.source.branch].len() {
            // A jump to the end of its branch; point it at the end of the
            // whole alternation instead.
            apply_patch(target, patch, end);
            continue;
        }
        panic!(
            "alternation trie: unpatched jump to {}@{} (slot {})",
            patch.source.ip, patch.source.branch, patch.slot
        );
    }
}

fn apply_patch(target: &mut Program, patch: &mut Patch, to: usize) {
    let value =
        to as i64 - patch.insn_addr as i64 - patch.insn_width as i64;
    // A two-word fork to the very next instruction is no fork at all;
    // demote it so useless-jump removal can delete it.
    if value == 0 && patch.insn_width == 2 {
        target.code[patch.insn_addr] = Instr::JUMP;
    }
    target.code[patch.slot] = value as Word;
    patch.done = true;
}
