/*
 * @Description  : Module trait 定义
 *
 * 模块树是显式声明的：每个组合模块按固定顺序列出自己的具名子模块，
 * 成员枚举就是对这棵树的一次递归遍历，结果是完全物化、顺序确定、可重复遍历的列表。
 */

use super::pool::{MemberKind, ParamId};
use std::collections::HashSet;

/// `(完整名称, ParamId)`列表，顺序与模块声明顺序一致
pub type NamedMembers = Vec<(String, ParamId)>;

/// 模块 trait
///
/// # 设计原则
/// - `forward()` **不是** trait 方法（签名各异）
/// - `new()` **不是** trait 方法（参数各异）
/// - 模块只持有`ParamId`，张量本身在参数池中
///
/// # 使用示例
///
/// ```ignore
/// struct ConvBn {
///     conv: Conv1x1,
///     bn: BatchNorm2d,
/// }
///
/// impl Module for ConvBn {
///     fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers {
///         let mut members = self.conv.named_members(kind, &join_name(prefix, "conv"));
///         members.extend(self.bn.named_members(kind, &join_name(prefix, "bn")));
///         members
///     }
/// }
/// ```
pub trait Module {
    /// 列出本模块（含子模块）中某一种类的全部成员，名称带上`prefix`前缀
    fn named_members(&self, kind: MemberKind, prefix: &str) -> NamedMembers;

    fn named_parameters(&self, prefix: &str) -> NamedMembers {
        self.named_members(MemberKind::Parameters, prefix)
    }

    fn named_buffers(&self, prefix: &str) -> NamedMembers {
        self.named_members(MemberKind::Buffers, prefix)
    }

    /// 获取参数数量
    fn num_params(&self) -> usize {
        self.named_parameters("").len()
    }
}

/// 以`.`连接前缀与名称
pub fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// 按`ParamId`去重，同一个张量以最先出现的名称为准
pub fn dedup_members<I: IntoIterator<Item = (String, ParamId)>>(members: I) -> NamedMembers {
    let mut memo = HashSet::new();
    members
        .into_iter()
        .filter(|(_, id)| memo.insert(*id))
        .collect()
}
