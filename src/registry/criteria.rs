//! 实例筛选条件

use crate::types::ServiceInfo;
use serde::{Deserialize, Serialize};

/// 服务名与版本，版本为空表示任意版本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCriteria {
    pub name: String,
    pub version: String,
}

impl ServiceCriteria {
    pub fn matches(&self, info: &ServiceInfo) -> bool {
        self.name == info.name && (self.version.is_empty() || self.version == info.version)
    }
}

/// 实例筛选条件，空列表表示不限制
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    pub hosts: Vec<String>,
    pub regions: Vec<String>,
    pub instances: Vec<String>,
    pub services: Vec<ServiceCriteria>,
    pub registered: Option<bool>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按服务名和版本筛选的条件
    pub fn for_service(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new().with_service(name, version)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        push_unique(&mut self.hosts, host.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        push_unique(&mut self.regions, region.into());
        self
    }

    pub fn with_instance(mut self, uuid: impl Into<String>) -> Self {
        push_unique(&mut self.instances, uuid.into());
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let service = ServiceCriteria {
            name: name.into(),
            version: version.into(),
        };
        if !self.services.contains(&service) {
            self.services.push(service);
        }
        self
    }

    pub fn with_registered(mut self, registered: bool) -> Self {
        self.registered = Some(registered);
        self
    }

    pub fn matches(&self, info: &ServiceInfo) -> bool {
        if let Some(registered) = self.registered {
            if registered != info.registered {
                return false;
            }
        }
        if !self.hosts.is_empty() && !self.hosts.iter().any(|h| h == info.host()) {
            return false;
        }
        if !self.regions.is_empty() && !self.regions.iter().any(|r| *r == info.region) {
            return false;
        }
        if !self.instances.is_empty() && !self.instances.iter().any(|u| *u == info.uuid) {
            return false;
        }
        if !self.services.is_empty() && !self.services.iter().any(|s| s.matches(info)) {
            return false;
        }
        true
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
