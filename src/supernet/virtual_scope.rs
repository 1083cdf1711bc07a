/*
 * @Description  : 虚拟上下文：进入时克隆激活成员，退出时把值原地拷贝回去
 *
 * 在虚拟上下文中可以对候选网络做任意次“试探性”的训练步（如二阶近似中的虚拟更新），
 * 离开后共享权重恢复原样。无论是正常结束、出错返回还是panic展开，恢复都会执行。
 *
 * ```ignore
 * {
 *     let _guard = candidate.begin_virtual()?;
 *     candidate.train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[], 1)?;
 *     // ...
 * } // 在此恢复
 *
 * let loss = with_virtual(&candidate, |c| {
 *     c.train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[&CrossEntropyLoss], 1)
 * })?;
 * ```
 */

use super::candidate::CandidateNet;
use crate::errors::NasError;
use crate::nn::module::NamedMembers;
use crate::nn::pool::{ParamId, ParamPool, PoolHandle};
use crate::tensor::Tensor;
use std::collections::BTreeSet;

/// 进入虚拟上下文时保存的`(名称, ParamId, 值)`
#[derive(Debug, Clone)]
pub struct VirtualSnapshot {
    entries: Vec<(String, ParamId, Tensor)>,
}

impl VirtualSnapshot {
    pub fn capture(pool: &ParamPool, members: &[(String, ParamId)]) -> Self {
        Self {
            entries: members
                .iter()
                .map(|(name, id)| (name.clone(), *id, pool.value(*id).clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _, _)| name.as_str())
    }

    fn restore(&self, pool: &mut ParamPool) -> Result<(), NasError> {
        for (_, id, value) in &self.entries {
            pool.assign(*id, value)?;
        }
        Ok(())
    }
}

/// 虚拟上下文的守卫：drop（或`close`）时恢复
pub struct VirtualGuard<'c> {
    pool: PoolHandle,
    snapshot: Option<VirtualSnapshot>,
    /// 退出时重新枚举成员，用于核对名称集合
    members: Box<dyn Fn() -> Result<NamedMembers, NasError> + 'c>,
}

impl<'c> VirtualGuard<'c> {
    pub fn new<F>(pool: PoolHandle, members: F) -> Result<Self, NasError>
    where
        F: Fn() -> Result<NamedMembers, NasError> + 'c,
    {
        let named = members()?;
        let snapshot = VirtualSnapshot::capture(&pool.borrow(), &named);
        log::debug!("进入虚拟上下文，保存{}个张量", snapshot.len());
        Ok(Self {
            pool,
            snapshot: Some(snapshot),
            members: Box::new(members),
        })
    }

    pub fn snapshot(&self) -> Option<&VirtualSnapshot> {
        self.snapshot.as_ref()
    }

    /// 立即恢复。先写回全部保存的值，再核对退出时的成员名称是否与进入时一致
    pub fn close(mut self) -> Result<(), NasError> {
        match self.snapshot.take() {
            Some(snapshot) => self.restore(&snapshot),
            None => Ok(()),
        }
    }

    fn restore(&self, snapshot: &VirtualSnapshot) -> Result<(), NasError> {
        {
            let mut pool = self.pool.try_borrow_mut().map_err(|_| {
                NasError::Computation("退出虚拟上下文时参数池仍被占用".to_string())
            })?;
            snapshot.restore(&mut pool)?;
        }
        log::debug!("退出虚拟上下文，恢复{}个张量", snapshot.len());

        let current = (self.members)()?;
        let saved = snapshot.names().collect::<BTreeSet<_>>();
        let now = current.iter().map(|(n, _)| n.as_str()).collect::<BTreeSet<_>>();
        if saved != now {
            let diff = saved.symmetric_difference(&now).copied().collect::<Vec<_>>();
            return Err(NasError::VirtualStateMismatch(format!(
                "进入与退出时的成员不一致：{diff:?}"
            )));
        }
        Ok(())
    }
}

impl Drop for VirtualGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = self.restore(&snapshot) {
                log::error!("虚拟上下文恢复失败：{e}");
            }
        }
    }
}

/// 闭包形式的虚拟上下文：`body`结束后先恢复，再返回`body`的结果（`body`的错误优先）
pub fn with_virtual<C, T, F>(candidate: &C, body: F) -> Result<T, NasError>
where
    C: CandidateNet + ?Sized,
    F: FnOnce(&C) -> Result<T, NasError>,
{
    let guard = candidate.begin_virtual()?;
    let result = body(candidate);
    let restored = guard.close();
    match (result, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            log::error!("虚拟上下文恢复失败（已被闭包的错误覆盖）：{restore_err}");
            Err(e)
        }
    }
}
