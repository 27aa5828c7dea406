use serde::{Serialize, ser::SerializeStruct};
use sysinfo::{Disks, System};

use crate::lib::tasks::types::Resources;

#[derive(Debug, Clone)]
pub struct HostStats {
    pub cpu_usage: f32,
    pub total_cpus: u64,
    pub total_memory: u64,
    pub available_memory: u64,
    pub total_disk: u64,
    pub available_disk: u64,
    pub hostname: String,
    pub system_name: String,
    pub task_count: u64,
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("HostStats", 9)?;
        state.serialize_field("cpu_usage", &format!("{:.2}%", self.cpu_usage))?;
        state.serialize_field("total_cpus", &self.total_cpus)?;
        state.serialize_field("total_memory_mb", &self.total_memory)?;
        state.serialize_field("available_memory_mb", &self.available_memory)?;
        state.serialize_field("total_disk_mb", &self.total_disk)?;
        state.serialize_field("available_disk_mb", &self.available_disk)?;
        state.serialize_field("hostname", &self.hostname)?;
        state.serialize_field("system_name", &self.system_name)?;
        state.serialize_field("task_count", &self.task_count)?;
        state.end()
    }
}

impl HostStats {
    /// Total host capacity in offer units.
    pub fn capacity(&self) -> Resources {
        Resources {
            cpus: self.total_cpus as f64,
            mem: self.total_memory as i64,
            disk: self.total_disk as i64,
        }
    }

    /// Capacity currently free on the host, as sysinfo sees it.
    pub fn available(&self) -> Resources {
        Resources {
            cpus: self.total_cpus as f64,
            mem: self.available_memory as i64,
            disk: self.available_disk as i64,
        }
    }

    pub fn to_metrics(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

pub fn get_stats(sysinfo: &mut System, task_count: u64) -> HostStats {
    sysinfo.refresh_cpu_usage();
    sysinfo.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let total_disk: u64 = disks.iter().map(|disk| disk.total_space()).sum();
    let available_disk: u64 = disks.iter().map(|disk| disk.available_space()).sum();

    HostStats {
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_cpus: sysinfo.cpus().len() as u64,
        total_memory: sysinfo.total_memory() / 1024 / 1024,
        available_memory: sysinfo.available_memory() / 1024 / 1024,
        total_disk: total_disk / 1024 / 1024,
        available_disk: available_disk / 1024 / 1024,
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        task_count,
    }
}
