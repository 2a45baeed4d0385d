//! 工作实例身份
//!
//! 每个进程启动时生成一次，之后处理的每一单都以该身份署名，
//! 使完成的工作无需协调即可追溯到具体实例。

use uuid::Uuid;

/// 咖啡师身份
///
/// 配置的前缀加随机唯一后缀，进程生命周期内不变。
/// 显式注入使用方而非全局状态，测试可用 [`WorkerIdentity::fixed`] 替换。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// 生成带随机后缀的新身份
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }

    /// 使用固定值构造身份，供测试注入
    pub fn fixed(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_carries_prefix() {
        let identity = WorkerIdentity::generate("barista");
        assert!(identity.as_str().starts_with("barista-"));
        // 前缀之外必须有随机后缀
        assert!(identity.as_str().len() > "barista-".len());
    }

    #[test]
    fn test_generate_is_unique_per_call() {
        let a = WorkerIdentity::generate("barista");
        let b = WorkerIdentity::generate("barista");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_identity_for_tests() {
        let identity = WorkerIdentity::fixed("barista-test");
        assert_eq!(identity.as_str(), "barista-test");
        assert_eq!(identity.to_string(), "barista-test");
    }
}
