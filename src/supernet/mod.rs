/*
 * @Description  : 权重共享的超网（super network）与其上的候选网络
 *
 * 超网持有搜索空间中每条边上的全部原语；一次 rollout 为每个单元组选定一组边及其原语，
 * 据此组装出的候选网络只是超网上的一个视图，训练它即是训练超网中被选中的那部分共享权重。
 *
 * ```ignore
 * let super_net = SuperNet::new(&config)?;
 * let candidate = super_net.assemble_candidate(&rollout)?;
 * let ids = candidate.named_parameters()?.into_iter().map(|(_, id)| id).collect();
 * let mut optimizer = SGD::new(candidate.pool(), ids, 0.05);
 * candidate.train_queue(&mut loader.queue(), &mut optimizer, &CrossEntropyLoss, &[&Accuracy], 10)?;
 * let acc = candidate.eval_queue(&mut valid.queue(), &[&Accuracy], 5, None)?;
 * ```
 */

mod candidate;
mod config;
mod context;
mod manager;
mod network;
mod shared_cell;
mod shared_op;
mod state_dict;
mod sub_candidate;
mod virtual_scope;

#[cfg(test)]
mod tests;

pub use candidate::{Batch, CandidateNet, GradientOutput, Mode};
pub use config::SuperNetConfig;
pub use context::ForwardContext;
pub use manager::WeightsManager;
pub use network::SuperNet;
pub use shared_cell::SharedCell;
pub use shared_op::SharedOp;
pub use state_dict::StateDict;
pub use sub_candidate::SubCandidateNet;
pub use virtual_scope::{VirtualGuard, VirtualSnapshot, with_virtual};
