use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub fn save_binary<T: Serialize>(data: &T, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, data)?;
    Ok(())
}

pub fn load_binary<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::Design;
    use crate::db::tech::Tech;
    use crate::geom::rect::Rect;

    #[test]
    fn design_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("eda-persist-{}", std::process::id()));
        let path = dir.join("d.bin");
        let mut d = Design::new("rt", Tech::standard(3, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        d.add_net("n0");
        save_binary(&d, &path).unwrap();
        let back: Design = load_binary(&path).unwrap();
        assert_eq!(back.name, "rt");
        assert_eq!(back.nets.len(), 1);
        assert_eq!(back.tech.vias.len(), d.tech.vias.len());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
