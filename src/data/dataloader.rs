/*
 * @Description  : DataLoader - PyTorch 风格的数据批量加载器
 *
 * 提供统一的数据迭代 API，支持：
 * - 自动分批 (batch_size)
 * - 随机打乱 (shuffle)
 * - 丢弃不完整批次 (drop_last)
 * - 无限循环的批次队列（每轮重新打乱）
 */

use crate::tensor::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// TensorDataset - 持有特征和标签的数据集
#[derive(Clone)]
pub struct TensorDataset {
    features: Tensor,
    labels: Tensor,
    len: usize,
}

impl TensorDataset {
    /// 创建新的 TensorDataset
    ///
    /// # Panics
    /// 如果 features 和 labels 的样本数不一致
    pub fn new(features: Tensor, labels: Tensor) -> Self {
        let len = features.shape()[0];
        assert_eq!(
            len,
            labels.shape()[0],
            "TensorDataset: features 和 labels 的样本数必须一致，得到 {} vs {}",
            len,
            labels.shape()[0]
        );
        Self {
            features,
            labels,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn labels(&self) -> &Tensor {
        &self.labels
    }

    /// 按样本下标取出一批
    fn batch(&self, indices: &[usize]) -> Option<(Tensor, Tensor)> {
        let features = self.features.select_rows(indices).ok()?;
        let labels = self.labels.select_rows(indices).ok()?;
        Some((features, labels))
    }
}

/// DataLoader - PyTorch 风格的数据批量加载器
///
/// # 示例
/// ```ignore
/// let loader = DataLoader::new(dataset, 32).shuffle(true).drop_last(true);
/// for (x_batch, y_batch) in loader.iter() {
///     // ...
/// }
/// ```
pub struct DataLoader {
    dataset: TensorDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
}

impl DataLoader {
    pub fn new(dataset: TensorDataset, batch_size: usize) -> Self {
        assert!(batch_size > 0, "DataLoader: batch_size 必须大于 0");
        Self {
            dataset,
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }

    /// 设置是否打乱数据
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// 设置是否丢弃最后一个不完整的批次
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// 设置随机种子（用于 shuffle）
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 获取批次数量
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn epoch_indices(&self, rng: &mut StdRng) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(rng);
        }
        indices
    }

    /// 遍历一轮（epoch）
    pub fn iter(&self) -> DataLoaderIterator<'_> {
        let indices = self.epoch_indices(&mut self.rng());
        DataLoaderIterator {
            loader: self,
            indices,
            current_batch: 0,
        }
    }

    /// 无限循环的批次队列：一轮结束后自动开始下一轮（打乱时每轮重新打乱）。
    /// 数据集为空、或`drop_last`下不足一批时，队列立即结束
    pub fn queue(&self) -> DataQueue<'_> {
        let mut rng = self.rng();
        let indices = self.epoch_indices(&mut rng);
        DataQueue {
            loader: self,
            rng,
            indices,
            current_batch: 0,
        }
    }

    /// 第`batch`批在`indices`中的区间；超出本轮时返回None
    fn batch_range(&self, batch: usize) -> Option<std::ops::Range<usize>> {
        if batch >= self.num_batches() {
            return None;
        }
        let start = batch * self.batch_size;
        let end = (start + self.batch_size).min(self.dataset.len());
        Some(start..end)
    }
}

/// DataLoader 迭代器（一轮）
pub struct DataLoaderIterator<'a> {
    loader: &'a DataLoader,
    indices: Vec<usize>,
    current_batch: usize,
}

impl Iterator for DataLoaderIterator<'_> {
    type Item = (Tensor, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.loader.batch_range(self.current_batch)?;
        self.current_batch += 1;
        self.loader.dataset.batch(&self.indices[range])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.loader.num_batches().saturating_sub(self.current_batch);
        (remaining, Some(remaining))
    }
}

/// 无限批次队列
pub struct DataQueue<'a> {
    loader: &'a DataLoader,
    rng: StdRng,
    indices: Vec<usize>,
    current_batch: usize,
}

impl Iterator for DataQueue<'_> {
    type Item = (Tensor, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        if self.loader.num_batches() == 0 {
            return None;
        }
        let range = match self.loader.batch_range(self.current_batch) {
            Some(range) => range,
            None => {
                self.indices = self.loader.epoch_indices(&mut self.rng);
                self.current_batch = 0;
                self.loader.batch_range(0)?
            }
        };
        self.current_batch += 1;
        self.loader.dataset.batch(&self.indices[range])
    }
}
