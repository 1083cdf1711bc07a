/*
 * @Description  : 状态字典：有序的`名称 -> 张量`映射，以bincode持久化
 */

use crate::errors::NasError;
use crate::nn::pool::{ParamId, ParamPool};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDict {
    entries: Vec<(String, Tensor)>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按`members`的顺序拷贝出各成员当前的值
    pub fn from_members(pool: &ParamPool, members: &[(String, ParamId)]) -> Self {
        Self {
            entries: members
                .iter()
                .map(|(name, id)| (name.clone(), pool.value(*id).clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, name: &str, tensor: Tensor) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, value)) => *value = tensor,
            None => self.entries.push((name.to_string(), tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// 把字典中的值原地拷贝进`members`对应的张量。
    /// `strict`时名称集合必须一致，否则只载入两边都有的名称
    pub fn load_into(
        &self,
        pool: &mut ParamPool,
        members: &[(String, ParamId)],
        strict: bool,
    ) -> Result<(), NasError> {
        if strict {
            let expected = members.iter().map(|(n, _)| n.as_str()).collect::<HashSet<_>>();
            let given = self.names().collect::<HashSet<_>>();
            let mut missing = expected.difference(&given).copied().collect::<Vec<_>>();
            let mut unexpected = given.difference(&expected).copied().collect::<Vec<_>>();
            if !missing.is_empty() || !unexpected.is_empty() {
                missing.sort_unstable();
                unexpected.sort_unstable();
                return Err(NasError::StateDictMismatch(format!(
                    "缺少{missing:?}，多出{unexpected:?}"
                )));
            }
        }
        // 先校验全部形状，避免载入到一半失败
        let pairs = members
            .iter()
            .filter_map(|(name, id)| self.get(name).map(|tensor| (name, *id, tensor)))
            .collect::<Vec<_>>();
        for (name, id, tensor) in &pairs {
            if !tensor.is_same_shape(pool.value(*id)) {
                return Err(NasError::StateDictMismatch(format!(
                    "{name}的形状{:?}与当前形状{:?}不一致",
                    tensor.shape(),
                    pool.value(*id).shape()
                )));
            }
        }
        for (_, id, tensor) in pairs {
            pool.assign(id, tensor)?;
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), NasError> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NasError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
