use crate::error::{ChunkWriteError, RegionLoadError};
use crate::options::RegionOptions;
use crate::position::{ChunkPosition, RegionChunkPosition, RegionPosition};
use crate::region::Region;
use crate::source::RegionFile;
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::read_dir;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Region file which is opened on first access.
struct RegionSlot {
    path: PathBuf,
    region: Option<Box<Region<RegionFile>>>,
}

/// Regions of a world folder, keyed by position.
///
/// Folder is scanned once, region files are opened only when resolved.
pub struct RegionIndex {
    /// Folder where region files located.
    folder: PathBuf,
    options: RegionOptions,
    regions: BTreeMap<RegionPosition, RegionSlot>,
}

impl RegionIndex {
    pub fn new<P: AsRef<Path>>(folder: P) -> Result<Self, io::Error> {
        Self::with_options(folder, RegionOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(
        folder: P,
        options: RegionOptions,
    ) -> Result<Self, io::Error> {
        let folder = folder.as_ref().to_path_buf();
        let regions = discover_regions(&folder)?;

        debug!(
            target: "anvil-store",
            "Found {} region files in {}",
            regions.len(),
            folder.display()
        );

        Ok(RegionIndex {
            folder,
            options,
            regions,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Known region positions in ascending order.
    pub fn positions(&self) -> Vec<RegionPosition> {
        self.regions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn contains(&self, position: RegionPosition) -> bool {
        self.regions.contains_key(&position)
    }

    pub fn is_opened(&self, position: RegionPosition) -> bool {
        self.regions
            .get(&position)
            .map(|slot| slot.region.is_some())
            .unwrap_or(false)
    }

    /// Returns region, opening it on first access.
    ///
    /// Region at unknown position is empty and bound to `r.<x>.<z>.mca` in
    /// index folder, file is created when the first chunk is saved.
    pub fn resolve(
        &mut self,
        position: RegionPosition,
    ) -> Result<&mut Region<RegionFile>, RegionLoadError> {
        let folder = &self.folder;
        let slot = self
            .regions
            .entry(position)
            .or_insert_with(|| RegionSlot {
                path: folder.join(position.file_name()),
                region: None,
            });

        let region = match slot.region.take() {
            Some(region) => region,
            None => {
                debug!(
                    target: "anvil-store",
                    "Opening region x: {}, z: {} from {}",
                    position.x,
                    position.z,
                    slot.path.display()
                );

                let region = Region::open_or_empty_at(position, &slot.path, &self.options)?;
                Box::new(region)
            }
        };

        let region: &mut Region<RegionFile> = slot.region.insert(region);

        Ok(region)
    }

    /// Returns region which contains chunk, and chunk position inside it.
    pub fn resolve_chunk(
        &mut self,
        position: ChunkPosition,
    ) -> Result<(&mut Region<RegionFile>, RegionChunkPosition), RegionLoadError> {
        let region = self.resolve(position.region())?;

        Ok((region, position.region_chunk()))
    }

    /// Opens every known region, returns amount of newly opened.
    pub fn open_all(&mut self) -> Result<usize, RegionLoadError> {
        let mut opened = 0;

        for position in self.positions() {
            if !self.is_opened(position) {
                self.resolve(position)?;
                opened += 1;
            }
        }

        Ok(opened)
    }

    pub fn opened_mut(&mut self) -> impl Iterator<Item = &mut Region<RegionFile>> {
        self.regions
            .values_mut()
            .filter_map(|slot| slot.region.as_mut().map(|region| &mut **region))
    }

    /// Saves every opened region with unsaved changes, returns amount of chunks saved.
    pub fn save_all(&mut self) -> Result<usize, ChunkWriteError> {
        self.save_all_cancellable(&AtomicBool::new(false))
    }

    /// Like `save_all`, stops before the next region once `cancel` is set.
    pub fn save_all_cancellable(&mut self, cancel: &AtomicBool) -> Result<usize, ChunkWriteError> {
        let mut saved = 0;

        for region in self.opened_mut() {
            if cancel.load(Ordering::Relaxed) {
                debug!(target: "anvil-store", "Saving regions cancelled");
                break;
            }

            if region.is_dirty() {
                saved += region.save()?;
            }
        }

        Ok(saved)
    }

    /// Like `save_all_cancellable`, saving regions in parallel.
    pub fn save_all_parallel(&mut self, cancel: &AtomicBool) -> Result<usize, ChunkWriteError> {
        let results: Vec<Result<usize, ChunkWriteError>> = self
            .regions
            .par_iter_mut()
            .filter_map(|(_, slot)| slot.region.as_mut())
            .filter(|region| region.is_dirty())
            .map(|region| {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(0);
                }

                region.save()
            })
            .collect();

        let mut saved = 0;

        for result in results {
            saved += result?;
        }

        Ok(saved)
    }

    /// Saves and compacts every opened region, stops before the next region once `cancel` is set.
    pub fn compact_all(&mut self, cancel: &AtomicBool) -> Result<usize, ChunkWriteError> {
        let mut compacted = 0;

        for region in self.opened_mut() {
            if cancel.load(Ordering::Relaxed) {
                debug!(target: "anvil-store", "Compacting regions cancelled");
                break;
            }

            region.compact()?;
            compacted += 1;
        }

        Ok(compacted)
    }
}

fn discover_regions(folder: &Path) -> Result<BTreeMap<RegionPosition, RegionSlot>, io::Error> {
    let mut regions = BTreeMap::new();

    let entries = match read_dir(folder) {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(regions),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let path = entry?.path();

        match region_position_from_path(&path) {
            Some(position) if path.is_file() => {
                regions.insert(position, RegionSlot { path, region: None });
            }
            _ => debug!(target: "anvil-store", "Skipping {}", path.display()),
        }
    }

    Ok(regions)
}

/// Parses region position from `r.<x>.<z>.mca` file name.
pub fn region_position_from_path(path: &Path) -> Option<RegionPosition> {
    // we can use lossy because of the bound check later
    let filename = path.file_name()?.to_string_lossy();
    let parts: Vec<_> = filename.split('.').collect();

    let (x, z) = parse_coords(parts)?;

    Some(RegionPosition::new(x, z))
}

fn parse_coords(parts: Vec<&str>) -> Option<(i32, i32)> {
    let incorrect_format = parts.len() != 4 || parts[0] != "r" || parts[3] != "mca";

    if incorrect_format {
        return None;
    }

    Some((i32::from_str(parts[1]).ok()?, i32::from_str(parts[2]).ok()?))
}

#[cfg(test)]
mod tests {
    use crate::error::RegionLoadError;
    use crate::index::{region_position_from_path, RegionIndex};
    use crate::position::{ChunkPosition, RegionChunkPosition, RegionPosition};
    use crate::region::Region;
    use nbt::CompoundTag;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn test_tag(value: i32) -> CompoundTag {
        let mut compound_tag = CompoundTag::new();
        compound_tag.insert_i32("value", value);

        compound_tag
    }

    #[test]
    fn test_position_parse() {
        let mut path = PathBuf::new();
        path.set_file_name("r.-1.1.mca");

        let pos = region_position_from_path(&path).unwrap();
        assert_eq!(RegionPosition { x: -1, z: 1 }, pos)
    }

    #[test]
    fn test_position_parse_invalid_format() {
        let mut path = PathBuf::new();
        path.set_file_name("this is not a valid region.filename");

        assert!(region_position_from_path(&path).is_none());
        assert!(region_position_from_path(&PathBuf::from("r.a.1.mca")).is_none());
        assert!(region_position_from_path(&PathBuf::from("r.0.0.mcr")).is_none());
    }

    #[test]
    fn test_missing_folder() {
        let dir = tempdir().unwrap();
        let index = RegionIndex::new(dir.path().join("region")).unwrap();

        assert!(index.is_empty());
    }

    #[test]
    fn test_lazy_open() {
        let dir = tempdir().unwrap();

        let mut region = Region::open_or_empty(dir.path().join("r.0.0.mca")).unwrap();
        region.put(RegionChunkPosition::new(1, 1), test_tag(1));
        region.save().unwrap();

        // Truncated header, fails only when opened.
        fs::write(dir.path().join("r.5.-5.mca"), vec![7u8; 100]).unwrap();
        fs::write(dir.path().join("level.dat"), vec![0u8; 10]).unwrap();

        let mut index = RegionIndex::new(dir.path()).unwrap();

        assert_eq!(
            index.positions(),
            vec![RegionPosition::new(0, 0), RegionPosition::new(5, -5)]
        );
        assert!(!index.is_opened(RegionPosition::new(0, 0)));

        let (region, position) = index.resolve_chunk(ChunkPosition::new(1, 1)).unwrap();
        assert_eq!(region.get(position).unwrap().get_i32("value").unwrap(), 1);

        assert!(index.is_opened(RegionPosition::new(0, 0)));
        assert!(!index.is_opened(RegionPosition::new(5, -5)));

        match index.resolve(RegionPosition::new(5, -5)).err().unwrap() {
            RegionLoadError::TruncatedHeader { length: 100 } => {}
            e => panic!("Expected `TruncatedHeader` but got `{:?}`", e),
        }

        assert!(index.open_all().is_err());
    }

    #[test]
    fn test_resolve_unknown_position() {
        let dir = tempdir().unwrap();
        let mut index = RegionIndex::new(dir.path()).unwrap();

        let (region, position) = index
            .resolve_chunk(ChunkPosition::new(-1, 40))
            .unwrap();
        assert_eq!(region.position(), RegionPosition::new(-1, 1));
        assert!(region.positions().is_empty());

        region.put(position, test_tag(5));

        assert!(index.contains(RegionPosition::new(-1, 1)));
        assert!(!dir.path().join("r.-1.1.mca").exists());

        assert_eq!(index.save_all().unwrap(), 1);
        assert!(dir.path().join("r.-1.1.mca").exists());

        let mut index = RegionIndex::new(dir.path()).unwrap();
        let (region, position) = index
            .resolve_chunk(ChunkPosition::new(-1, 40))
            .unwrap();
        assert_eq!(region.get(position).unwrap().get_i32("value").unwrap(), 5);
    }

    #[test]
    fn test_save_all_skips_clean_regions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.0.0.mca");

        let mut region = Region::open_or_empty(&path).unwrap();
        region.put(RegionChunkPosition::new(0, 0), test_tag(1));
        region.save().unwrap();

        let before = fs::read(&path).unwrap();

        let mut index = RegionIndex::new(dir.path()).unwrap();
        index.open_all().unwrap();

        assert_eq!(index.save_all().unwrap(), 0);
        assert_eq!(fs::read(&path).unwrap(), before);

        // Untouched empty region is never created.
        index.resolve(RegionPosition::new(3, 3)).unwrap();
        assert_eq!(index.save_all().unwrap(), 0);
        assert!(!dir.path().join("r.3.3.mca").exists());
    }

    #[test]
    fn test_save_all_cancelled() {
        let dir = tempdir().unwrap();
        let mut index = RegionIndex::new(dir.path()).unwrap();

        let (region, position) = index.resolve_chunk(ChunkPosition::new(0, 0)).unwrap();
        region.put(position, test_tag(1));

        let cancel = AtomicBool::new(true);

        assert_eq!(index.save_all_cancellable(&cancel).unwrap(), 0);
        assert_eq!(index.save_all_parallel(&cancel).unwrap(), 0);
        assert!(index.opened_mut().all(|region| region.is_dirty()));
        assert!(!dir.path().join("r.0.0.mca").exists());
    }

    #[test]
    fn test_save_all_parallel() {
        let dir = tempdir().unwrap();
        let mut index = RegionIndex::new(dir.path()).unwrap();

        for (chunk_x, chunk_z) in [(0, 0), (32, 0), (-1, -1), (5, 64)].iter() {
            let (region, position) = index
                .resolve_chunk(ChunkPosition::new(*chunk_x, *chunk_z))
                .unwrap();
            region.put(position, test_tag(*chunk_x));
        }

        assert_eq!(index.len(), 4);
        assert_eq!(index.save_all_parallel(&AtomicBool::new(false)).unwrap(), 4);
        assert!(index.opened_mut().all(|region| !region.is_dirty()));

        for name in ["r.0.0.mca", "r.1.0.mca", "r.-1.-1.mca", "r.0.2.mca"].iter() {
            assert!(dir.path().join(name).exists(), "{} is missing", name);
        }
    }

    #[test]
    fn test_compact_all() {
        let dir = tempdir().unwrap();
        let mut index = RegionIndex::new(dir.path()).unwrap();

        let (region, _) = index.resolve_chunk(ChunkPosition::new(0, 0)).unwrap();
        region.put(RegionChunkPosition::new(0, 0), test_tag(1));
        region.put(RegionChunkPosition::new(1, 0), test_tag(2));
        region.save().unwrap();
        region.delete(RegionChunkPosition::new(0, 0));

        assert_eq!(index.compact_all(&AtomicBool::new(false)).unwrap(), 1);

        let region = index.resolve(RegionPosition::new(0, 0)).unwrap();
        assert!(region.free_sectors().is_empty());
        assert_eq!(
            region.metadata(RegionChunkPosition::new(1, 0)).start_sector_index(),
            2
        );
        assert_eq!(
            fs::metadata(dir.path().join("r.0.0.mca")).unwrap().len(),
            3 * 4096
        );
    }
}
