//! 驱动器注册表
//!
//! 按注册顺序保存驱动器，支持按下标和按地址查找。只能追加，
//! 不提供删除；轮询循环每个周期按注册顺序遍历。

use crate::drive::DriveHandle;
use crate::error::DriverError;
use candle_protocol::is_valid_address;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct DriveRegistry {
    drives: Vec<DriveHandle>,
    index: HashMap<u16, usize>,
}

impl DriveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册驱动器
    ///
    /// # Errors
    /// - `InvalidAddress`: 地址不在 [10, 2047] 内
    /// - `DuplicateAddress`: 地址已注册
    ///
    /// 失败时注册表不变。
    pub fn register(&mut self, address: u16) -> Result<DriveHandle, DriverError> {
        if !is_valid_address(address) {
            return Err(DriverError::InvalidAddress { address });
        }
        if self.index.contains_key(&address) {
            return Err(DriverError::DuplicateAddress { address });
        }

        let handle = DriveHandle::new(address);
        self.index.insert(address, self.drives.len());
        self.drives.push(handle.clone());
        Ok(handle)
    }

    /// 按地址查找
    pub fn lookup(&self, address: u16) -> Result<DriveHandle, DriverError> {
        self.index
            .get(&address)
            .map(|&i| self.drives[i].clone())
            .ok_or(DriverError::NotFound { address })
    }

    /// 按注册下标查找
    pub fn get(&self, index: usize) -> Option<&DriveHandle> {
        self.drives.get(index)
    }

    /// 按注册顺序遍历（可重复调用）
    pub fn iter(&self) -> std::slice::Iter<'_, DriveHandle> {
        self.drives.iter()
    }

    pub fn addresses(&self) -> Vec<u16> {
        self.drives.iter().map(DriveHandle::address).collect()
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    /// 供轮询线程使用的只读快照
    pub(crate) fn snapshot(&self) -> Arc<[DriveHandle]> {
        self.drives.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a DriveRegistry {
    type Item = &'a DriveHandle;
    type IntoIter = std::slice::Iter<'a, DriveHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DriveRegistry::new();
        let a = registry.register(300).unwrap();
        let b = registry.register(350).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(300).unwrap().same_drive(&a));
        assert!(registry.lookup(350).unwrap().same_drive(&b));
        assert!(registry.get(0).unwrap().same_drive(&a));
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_register_rejects_out_of_range() {
        let mut registry = DriveRegistry::new();
        for address in [0, 9, 2048, u16::MAX] {
            assert!(matches!(
                registry.register(address),
                Err(DriverError::InvalidAddress { address: a }) if a == address
            ));
        }
        assert!(registry.is_empty());
        assert!(registry.register(10).is_ok());
        assert!(registry.register(2047).is_ok());
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut registry = DriveRegistry::new();
        let first = registry.register(300).unwrap();
        assert!(matches!(
            registry.register(300),
            Err(DriverError::DuplicateAddress { address: 300 })
        ));
        assert_eq!(registry.len(), 1);
        // 原句柄不受影响
        assert!(registry.lookup(300).unwrap().same_drive(&first));
    }

    #[test]
    fn test_lookup_missing() {
        let registry = DriveRegistry::new();
        assert!(matches!(
            registry.lookup(300),
            Err(DriverError::NotFound { address: 300 })
        ));
    }

    #[test]
    fn test_iteration_order_is_registration_order() {
        let mut registry = DriveRegistry::new();
        for address in [500, 20, 1000, 11] {
            registry.register(address).unwrap();
        }
        assert_eq!(registry.addresses(), vec![500, 20, 1000, 11]);

        // 可重复遍历
        let first: Vec<u16> = registry.iter().map(|d| d.address()).collect();
        let second: Vec<u16> = (&registry).into_iter().map(|d| d.address()).collect();
        assert_eq!(first, second);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot[2].same_drive(&registry.lookup(1000).unwrap()));
    }
}
