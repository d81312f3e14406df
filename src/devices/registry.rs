use std::collections::{BTreeMap, BTreeSet};

use crate::config::ConfigError;
use crate::criteria::{CriteriaSet, PointValues, Timestamp};
use crate::error::RankError;

use super::{CommandKey, Device, DeviceCluster};

/// A ranked curtailment candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub key: CommandKey,
    pub cluster: String,
    pub priority: f64,
    /// Weighted, cluster-normalized criteria score. Lower curtails earlier.
    pub score: f64,
}

/// All device clusters, with device names unique across clusters.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    clusters: Vec<DeviceCluster>,
    index: BTreeMap<String, usize>,
}

impl ClusterRegistry {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a cluster or device name repeats.
    pub fn new(clusters: Vec<DeviceCluster>) -> Result<Self, ConfigError> {
        let mut index = BTreeMap::new();
        let mut names = BTreeSet::new();
        for (i, cluster) in clusters.iter().enumerate() {
            if !names.insert(cluster.name()) {
                return Err(ConfigError::new(
                    "clusters",
                    format!("duplicate cluster \"{}\"", cluster.name()),
                ));
            }
            for device in cluster.devices() {
                if index.insert(device.name().to_string(), i).is_some() {
                    return Err(ConfigError::new(
                        format!("clusters.{}.devices", cluster.name()),
                        format!("device \"{}\" belongs to more than one cluster", device.name()),
                    ));
                }
            }
        }
        Ok(Self { clusters, index })
    }

    pub fn clusters(&self) -> &[DeviceCluster] {
        &self.clusters
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        let i = *self.index.get(name)?;
        self.clusters[i].device(name)
    }

    fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        let i = *self.index.get(name)?;
        self.clusters[i].device_mut(name)
    }

    /// Routes a telemetry row to `device`. Returns `false` for unknown devices.
    pub fn ingest(&mut self, device: &str, timestamp: Timestamp, points: &PointValues) -> bool {
        match self.index.get(device) {
            Some(&i) => self.clusters[i].ingest(device, timestamp, points),
            None => false,
        }
    }

    pub fn criteria(&self, key: &CommandKey) -> Option<&CriteriaSet> {
        self.device(&key.device)?.criteria(&key.command)
    }

    pub fn criteria_mut(&mut self, key: &CommandKey) -> Option<&mut CriteriaSet> {
        self.device_mut(&key.device)?.criteria_mut(&key.command)
    }

    /// Commands currently on, across all clusters.
    pub fn on_set(&self) -> BTreeSet<CommandKey> {
        self.clusters.iter().flat_map(DeviceCluster::on_set).collect()
    }

    /// Commands currently off, across all clusters.
    pub fn off_set(&self) -> BTreeSet<CommandKey> {
        self.clusters.iter().flat_map(DeviceCluster::off_set).collect()
    }

    /// Ranks every command currently on, first to curtail first.
    ///
    /// Ordered by cluster priority, then score (both ascending), then
    /// device and command name, so identical state yields identical order.
    ///
    /// # Errors
    ///
    /// Propagates the first cluster scoring failure.
    pub fn rank(&self) -> Result<Vec<ScoredCandidate>, RankError> {
        let mut ranked = Vec::new();
        for cluster in &self.clusters {
            ranked.extend(cluster.score()?);
        }
        ranked.sort_by(|a, b| {
            a.priority
                .total_cmp(&b.priority)
                .then(a.score.total_cmp(&b.score))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(ranked)
    }

    /// Zeroes every command's curtail count.
    pub fn reset_curtail_counts(&mut self) {
        for device in self.clusters.iter_mut().flat_map(DeviceCluster::devices_mut) {
            let commands: Vec<String> = device.commands().map(str::to_string).collect();
            for command in commands {
                if let Some(set) = device.criteria_mut(&command) {
                    set.reset_curtail();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ahp::{AhpWeights, PairwiseMatrix};
    use crate::criteria::{
        CriteriaSet, Criterion, CriterionConfig, CurtailDirective, CurtailValue, LoadEstimate,
        MapperTables,
    };
    use crate::devices::StatusRule;

    fn device(name: &str, size: f64) -> Device {
        let config = CriterionConfig::Constant {
            value: size,
            minimum: None,
            maximum: None,
        };
        let criteria = BTreeMap::from([(
            "size".to_string(),
            Criterion::from_config("size", &config, &MapperTables::new()).expect("valid"),
        )]);
        let set = CriteriaSet::new(
            criteria,
            CurtailDirective {
                point: "Fan".into(),
                value: CurtailValue::Absolute(0.0),
                load: LoadEstimate::Fixed(1.0),
            },
        );
        Device::new(name).with_command("fan", set, StatusRule::Point("Status".into()))
    }

    fn cluster(name: &str, priority: f64, devices: Vec<Device>) -> DeviceCluster {
        let m = PairwiseMatrix::new(vec!["size".into()], vec![vec![1.0]]).expect("valid");
        let w = AhpWeights::derive(&m).expect("consistent");
        DeviceCluster::new(name, priority, w, devices).expect("valid cluster")
    }

    fn registry() -> ClusterRegistry {
        let mut r = ClusterRegistry::new(vec![
            cluster("rtus", 2.0, vec![device("rtu1", 4.0), device("rtu2", 1.0)]),
            cluster("lights", 1.0, vec![device("l1", 2.0), device("l2", 2.0)]),
        ])
        .expect("valid registry");
        let on = PointValues::from([("Status".to_string(), 1.0)]);
        for name in ["rtu1", "rtu2", "l1", "l2"] {
            assert!(r.ingest(name, 0.0, &on));
        }
        r
    }

    fn order(ranked: &[ScoredCandidate]) -> Vec<String> {
        ranked.iter().map(|c| c.key.to_string()).collect()
    }

    #[test]
    fn ranks_by_priority_then_score() {
        let r = registry();
        let ranked = r.rank().expect("ranks");
        assert_eq!(order(&ranked), ["l1/fan", "l2/fan", "rtu2/fan", "rtu1/fan"]);
    }

    #[test]
    fn ranking_is_deterministic() {
        let r = registry();
        let first = r.rank().expect("ranks");
        let second = r.rank().expect("ranks");
        assert_eq!(first, second);
    }

    #[test]
    fn off_commands_are_not_ranked() {
        let mut r = registry();
        r.ingest("rtu2", 1.0, &PointValues::new());
        let ranked = r.rank().expect("ranks");
        assert_eq!(order(&ranked), ["l1/fan", "l2/fan", "rtu1/fan"]);
        assert_eq!(
            r.off_set().into_iter().collect::<Vec<_>>(),
            [CommandKey::new("rtu2", "fan")]
        );
        assert_eq!(r.on_set().len(), 3);
    }

    #[test]
    fn rejects_device_in_two_clusters() {
        let result = ClusterRegistry::new(vec![
            cluster("a", 1.0, vec![device("d1", 1.0)]),
            cluster("b", 1.0, vec![device("d1", 1.0)]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn resets_every_curtail_count() {
        let mut r = registry();
        let key = CommandKey::new("rtu1", "fan");
        if let Some(set) = r.criteria_mut(&key) {
            set.increment_curtail();
        }
        assert_eq!(r.criteria(&key).map(CriteriaSet::curtail_count), Some(1.0));
        r.reset_curtail_counts();
        assert_eq!(r.criteria(&key).map(CriteriaSet::curtail_count), Some(0.0));
    }
}
