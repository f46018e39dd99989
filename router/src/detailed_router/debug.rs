use super::dispatch::DesignUpdate;
use crate::error::Result;
use crate::worker::WorkItem;
use eda_common::db::core::Design;
use eda_common::util::config::DetailedRoutingConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Writes worker inputs and per-iteration design deltas for offline replay.
///
/// Layout under the dump directory:
/// - `globals.bin`: the design as the run started
/// - `iter_<n>/worker_<id>.bin`: every work item of iteration `n`
/// - `iter_<n>/update.bin`: geometry and markers after iteration `n`
pub struct DebugDumper {
    dir: PathBuf,
    only_iter: Option<usize>,
}

impl DebugDumper {
    pub fn from_config(cfg: &DetailedRoutingConfig) -> Option<Self> {
        cfg.debug_dump_dir.as_ref().map(|dir| Self {
            dir: dir.clone(),
            only_iter: cfg.debug_iter,
        })
    }

    fn wants(&self, iter: usize) -> bool {
        self.only_iter.is_none_or(|i| i == iter)
    }

    fn iter_dir(&self, iter: usize) -> PathBuf {
        self.dir.join(format!("iter_{iter}"))
    }

    pub fn dump_globals(&self, design: &Design) -> Result<()> {
        write(&self.dir.join("globals.bin"), design)
    }

    pub fn dump_workers(&self, iter: usize, items: &[WorkItem]) -> Result<()> {
        if !self.wants(iter) {
            return Ok(());
        }
        for item in items {
            write(&self.iter_dir(iter).join(format!("worker_{}.bin", item.id)), item)?;
        }
        Ok(())
    }

    pub fn dump_update(&self, iter: usize, update: &DesignUpdate) -> Result<()> {
        if !self.wants(iter) {
            return Ok(());
        }
        write(&self.iter_dir(iter).join("update.bin"), update)
    }
}

fn write<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    bincode::serialize_into(BufWriter::new(File::create(path)?), data)?;
    Ok(())
}

/// Reads back anything the dumper wrote.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(bincode::deserialize_from(BufReader::new(File::open(path)?))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detailed_router::strategy::default_strategies;
    use eda_common::db::tech::Tech;
    use eda_common::geom::rect::Rect;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            Self(std::env::temp_dir().join(format!("eda-dump-{tag}-{}", std::process::id())))
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn dumps_replay_only_selected_iteration() {
        let tmp = TempDir::new("sel");
        let cfg = DetailedRoutingConfig {
            debug_dump_dir: Some(tmp.0.clone()),
            debug_iter: Some(2),
            ..Default::default()
        };
        let dumper = DebugDumper::from_config(&cfg).expect("enabled");
        let d = Design::new("dbg", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        let item = WorkItem {
            id: 7,
            iter: 2,
            route_box: d.die,
            ext_box: d.die.bloat(100),
            drc_box: d.die.bloat(50),
            args: default_strategies(&cfg)[2],
        };
        dumper.dump_globals(&d).expect("globals");
        dumper.dump_workers(1, std::slice::from_ref(&item)).expect("skipped");
        dumper.dump_workers(2, std::slice::from_ref(&item)).expect("written");

        assert!(!tmp.0.join("iter_1").exists());
        let back: WorkItem = load(&tmp.0.join("iter_2/worker_7.bin")).expect("load");
        assert_eq!(back, item);
        let g: Design = load(&tmp.0.join("globals.bin")).expect("globals");
        assert_eq!(g.name, "dbg");
    }
}
