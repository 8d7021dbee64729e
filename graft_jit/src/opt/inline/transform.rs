//! Inlining Transformation
//!
//! This module integrates a candidate graph into the caller at one invoke,
//! and builds the type switch that turns a virtual invoke into exact ones.
//!
//! # Monomorphic Splice
//!
//! ```text
//! Before:                      After:
//!
//!   pred                         pred
//!    │                            │
//!  Invoke(args)        →       callee body (params = args)
//!    │                         │        │
//!   next                     Return   Return ─┐
//!                              │        │     │  several returns:
//!                              └─ End  End ───┘  Merge + Phi
//!                                   │
//!                                  next
//! ```
//!
//! With no return at all the continuation is unreachable and is killed.
//!
//! # Type Switch
//!
//! ```text
//!   pred ─ If(recv instanceof =A) ─ true ─ Pi(recv) ─ Invoke A.f ─┐
//!            └ false ─ If(recv instanceof =B) ─ ... Invoke B.f ───┤
//!                        └ false ─ fallback ──────────────────────┤
//!                                                         Merge + Phi ─ next
//! ```
//!
//! The fallback is the original virtual invoke when some receivers were not
//! recorded, otherwise a deoptimization.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use super::clone::copy_graph_into;
use crate::error::{InlineError, InlineResult};
use crate::ir::graph::Graph;
use crate::ir::kind::{DeoptReason, InvokeKind, InvokeTarget, MethodId, NodeKind};
use crate::ir::node::NodeId;
use crate::ir::stamp::{Stamp, TypeId};

// =============================================================================
// Monomorphic Splice
// =============================================================================

/// Outcome of splicing one candidate.
#[derive(Debug, Default)]
pub struct SpliceResult {
    /// Invokes of the candidate as `(candidate id, caller id)`, in the
    /// candidate's control order.
    pub new_invokes: Vec<(NodeId, NodeId)>,
    /// Value that replaced the invoke's result, if any.
    pub return_value: Option<NodeId>,
    pub nodes_added: usize,
}

/// The live invoke `invoke` with its control neighbours.
fn invoke_site(caller: &Graph, invoke: NodeId) -> InlineResult<(InvokeTarget, NodeId, NodeId)> {
    let node = caller
        .get(invoke)
        .filter(|n| !n.is_dead())
        .ok_or(InlineError::InvalidCallSite(invoke))?;
    let target = *node
        .kind
        .as_invoke()
        .ok_or(InlineError::InvalidCallSite(invoke))?;
    let pred = node
        .predecessor()
        .ok_or(InlineError::InvalidCallSite(invoke))?;
    let next = node.next().ok_or(InlineError::InvalidCallSite(invoke))?;
    Ok((target, pred, next))
}

/// Check that `callee` can replace a call with `arg_count` arguments whose
/// result is used when `result_used` is set. Nothing is touched.
pub fn check_candidate(
    callee: &Graph,
    arg_count: usize,
    result_used: bool,
    method: MethodId,
) -> InlineResult<()> {
    let malformed = |reason: &str| InlineError::MalformedCallee {
        method,
        reason: reason.to_string(),
    };
    if callee.node(callee.start()).next().is_none() {
        return Err(InlineError::EmptyCalleeBody(method));
    }
    if let Some((index, _)) = callee.parameters().into_iter().find(|&(i, _)| i as usize >= arg_count) {
        return Err(malformed(&format!("parameter {index} has no argument")));
    }
    for ret in callee.returns() {
        let node = callee.node(ret);
        if node.predecessor().is_none() {
            return Err(malformed("return without predecessor"));
        }
        if result_used && node.inputs().is_empty() {
            return Err(malformed("void return of a used call"));
        }
    }
    Ok(())
}

/// Replace `invoke` in `caller` by a copy of `callee`.
///
/// Parameters of `callee` are bound to the invoke's arguments by their
/// declared index. `method` names the callee in errors. The candidate is
/// checked before the caller changes, so on error `caller` is untouched.
pub fn splice(
    caller: &mut Graph,
    invoke: NodeId,
    callee: &Graph,
    method: MethodId,
) -> InlineResult<SpliceResult> {
    let (_, pred, next) = invoke_site(caller, invoke)?;
    let args: SmallVec<[NodeId; 4]> = SmallVec::from_slice(caller.node(invoke).inputs());
    let has_users = caller.usage_count(invoke) > 0;
    check_candidate(callee, args.len(), has_users, method)?;
    let malformed = |reason: String| InlineError::MalformedCallee { method, reason };

    let callee_first = callee
        .node(callee.start())
        .next()
        .ok_or(InlineError::EmptyCalleeBody(method))?;
    let mut replacements = FxHashMap::default();
    replacements.insert(callee.start(), pred);
    for (index, param) in callee.parameters() {
        replacements.insert(param, args[index as usize]);
    }

    let live_before = caller.node_count();
    let dup = copy_graph_into(caller, callee, &replacements);
    let first = dup
        .get(callee_first)
        .ok_or_else(|| malformed("start successor was not copied".into()))?;
    caller.replace_successor(pred, invoke, first);

    let returns = dup.map_ids(&callee.returns());
    let mut return_value = None;

    match returns.as_slice() {
        [] => {
            // Nothing comes back: the continuation is unreachable.
            caller.node_mut(invoke).successors.clear();
            caller.node_mut(next).predecessor = NodeId::INVALID;
            caller.kill_cfg(next);
            caller.kill_with_floating_users(invoke);
        }
        &[ret] => {
            let value = caller.node(ret).inputs().first().copied();
            let ret_pred = caller
                .node(ret)
                .predecessor()
                .ok_or_else(|| malformed("return without predecessor".into()))?;
            if has_users {
                let value = value.ok_or_else(|| malformed("void return of a used call".into()))?;
                caller.replace_all_uses(invoke, value);
                return_value = Some(value);
            }
            caller.kill(ret);
            caller.set_next(ret_pred, next);
            caller.kill(invoke);
        }
        rets => {
            let merge = caller.add_node(NodeKind::Merge, &[], Stamp::Void);
            let mut values = SmallVec::<[NodeId; 4]>::new();
            for &ret in rets {
                let ret_pred = caller
                    .node(ret)
                    .predecessor()
                    .ok_or_else(|| malformed("return without predecessor".into()))?;
                if has_users {
                    let value = caller
                        .node(ret)
                        .inputs()
                        .first()
                        .copied()
                        .ok_or_else(|| malformed("void return of a used call".into()))?;
                    values.push(value);
                }
                caller.kill(ret);
                let end = caller.add_node(NodeKind::End, &[], Stamp::Void);
                caller.set_next(ret_pred, end);
                caller.add_end(merge, end);
            }
            caller.set_next(merge, next);
            if has_users {
                let stamp = caller.node(invoke).stamp;
                let phi = caller.add_phi(merge, &values, stamp);
                caller.replace_all_uses(invoke, phi);
                return_value = Some(phi);
            }
            caller.kill(invoke);
        }
    }

    let new_invokes = callee
        .control_order()
        .into_iter()
        .filter(|&n| callee.node(n).kind.as_invoke().is_some())
        .filter_map(|n| dup.get(n).filter(|&c| caller.is_live(c)).map(|c| (n, c)))
        .collect();

    let nodes_added = caller.node_count().saturating_sub(live_before);
    trace!(%invoke, %method, returns = returns.len(), nodes_added, "spliced");
    Ok(SpliceResult {
        new_invokes,
        return_value,
        nodes_added,
    })
}

// =============================================================================
// Type Switch
// =============================================================================

/// One arm of a type switch.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeSwitchArm {
    pub method: MethodId,
    pub receiver_types: SmallVec<[TypeId; 2]>,
    /// Fraction of calls taking this arm.
    pub probability: f64,
    /// Receiver stamp inside the arm.
    pub receiver_stamp: Stamp,
}

/// What runs for receivers no arm matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    VirtualCall,
    Deoptimize,
}

#[derive(Debug)]
pub struct TypeSwitch {
    /// The exact invoke of each arm, in arm order.
    pub arm_invokes: Vec<NodeId>,
    pub fallback_invoke: Option<NodeId>,
    /// Merge joining the arms; `None` when a single path remains.
    pub merge: Option<NodeId>,
}

/// Replace the virtual `invoke` by a type switch with one exact invoke per
/// arm.
pub fn build_type_switch(
    caller: &mut Graph,
    invoke: NodeId,
    arms: &[TypeSwitchArm],
    fallback: Fallback,
) -> InlineResult<TypeSwitch> {
    let (target, pred, next) = invoke_site(caller, invoke)?;
    if !target.kind.has_receiver() || arms.is_empty() {
        return Err(InlineError::InvalidCallSite(invoke));
    }
    let args: SmallVec<[NodeId; 4]> = SmallVec::from_slice(caller.node(invoke).inputs());
    let receiver = *args.first().ok_or(InlineError::InvalidCallSite(invoke))?;
    let stamp = caller.node(invoke).stamp;

    // Detach the invoke; `cursor` is the false side of the last test.
    caller.node_mut(invoke).successors.clear();
    caller.node_mut(next).predecessor = NodeId::INVALID;
    let mut cursor = pred;
    let mut remaining = 1.0_f64;
    let mut ends = Vec::new();
    let mut arm_invokes = Vec::with_capacity(arms.len());

    for arm in arms {
        // Each receiver type of the arm gets a test; their true sides join.
        let per_type = arm.probability / arm.receiver_types.len().max(1) as f64;
        let mut entries = SmallVec::<[NodeId; 2]>::new();
        for &ty in &arm.receiver_types {
            let test = caller.add_node(
                NodeKind::InstanceOf { ty, exact: true },
                &[receiver],
                Stamp::BOOL,
            );
            let p = if remaining > 0.0 {
                (per_type / remaining).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let branch = caller.add_node(NodeKind::If { true_probability: p }, &[test], Stamp::Void);
            let t = caller.add_node(NodeKind::Begin, &[], Stamp::Void);
            let f = caller.add_node(NodeKind::Begin, &[], Stamp::Void);
            caller.set_next(cursor, branch);
            caller.set_branches(branch, t, f);
            entries.push(t);
            cursor = f;
            remaining -= per_type;
        }

        let entry = match entries.as_slice() {
            &[single] => single,
            many => {
                let merge = caller.add_node(NodeKind::Merge, &[], Stamp::Void);
                for &begin in many {
                    let end = caller.add_node(NodeKind::End, &[], Stamp::Void);
                    caller.set_next(begin, end);
                    caller.add_end(merge, end);
                }
                merge
            }
        };

        let narrowed = caller.add_node(NodeKind::Pi, &[receiver, entry], arm.receiver_stamp);
        let mut arm_args = args.clone();
        arm_args[0] = narrowed;
        let exact = InvokeTarget {
            method: arm.method,
            bci: target.bci,
            kind: InvokeKind::Special,
        };
        let call = caller.add_node(NodeKind::Invoke(exact), &arm_args, stamp);
        caller.set_next(entry, call);
        arm_invokes.push(call);
        ends.push(call);
    }

    let fallback_invoke = match fallback {
        Fallback::VirtualCall => {
            let call = caller.add_node(NodeKind::Invoke(target), &args, stamp);
            caller.set_next(cursor, call);
            ends.push(call);
            Some(call)
        }
        Fallback::Deoptimize => {
            let deopt = caller.add_node(
                NodeKind::Deoptimize(DeoptReason::TypeCheckedInliningViolated),
                &[],
                Stamp::Void,
            );
            caller.set_next(cursor, deopt);
            None
        }
    };

    let has_users = caller.usage_count(invoke) > 0;
    let merge = match ends.as_slice() {
        &[only] => {
            caller.set_next(only, next);
            if has_users {
                caller.replace_all_uses(invoke, only);
            }
            None
        }
        paths => {
            let merge = caller.add_node(NodeKind::Merge, &[], Stamp::Void);
            for &path in paths {
                let end = caller.add_node(NodeKind::End, &[], Stamp::Void);
                caller.set_next(path, end);
                caller.add_end(merge, end);
            }
            caller.set_next(merge, next);
            if has_users {
                let phi = caller.add_phi(merge, paths, stamp);
                caller.replace_all_uses(invoke, phi);
            }
            Some(merge)
        }
    };
    caller.kill(invoke);

    trace!(%invoke, arms = arms.len(), ?fallback, "type switch built");
    Ok(TypeSwitch {
        arm_invokes,
        fallback_invoke,
        merge,
    })
}

// =============================================================================
// Tests
// =============================================================================
