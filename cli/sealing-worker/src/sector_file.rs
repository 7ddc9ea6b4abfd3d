use std::{fs::File, io::BufReader, path::Path};

use primitives_proofs::{ActorId, RegisteredSealProof, SectorNumber};
use sealing_pipeline::types::{PieceRecord, SectorPipelineEntry};
use serde::Deserialize;

use crate::WorkerError;

/// Sector description read by the `commd` and `import` commands.
///
/// ```json
/// {
///     "sp_id": 1000,
///     "sector_number": 1,
///     "seal_proof": "2KiB",
///     "pieces": [
///         {
///             "piece_index": 0,
///             "piece_cid": "baga6ea4seaq...",
///             "piece_size": 1024,
///             "data_raw_size": 1016
///         }
///     ]
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SectorFile {
    pub sp_id: ActorId,
    pub sector_number: SectorNumber,
    pub seal_proof: RegisteredSealProof,
    #[serde(default)]
    pub pieces: Vec<PieceRecord>,
}

impl SectorFile {
    pub fn load(path: &Path) -> Result<Self, WorkerError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn entry(&self) -> SectorPipelineEntry {
        SectorPipelineEntry::new(self.sp_id, self.sector_number, self.seal_proof)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use sealing_pipeline::{db::PipelineDB, layout::compute_commitment};

    use super::*;

    const SECTOR: &str = r#"{
        "sp_id": 1000,
        "sector_number": 7,
        "seal_proof": "2KiB",
        "pieces": [
            {
                "piece_index": 0,
                "piece_cid": "baga6ea4seaqknzm22isnhsxt2s4dnw45kfywmhenngqq3nc7jvecakoca6ksyhy",
                "piece_size": 1024,
                "data_raw_size": 1016
            }
        ]
    }"#;

    fn write_sector(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_and_import() {
        let file = write_sector(SECTOR);
        let sector = SectorFile::load(file.path()).unwrap();
        assert_eq!(sector.seal_proof, RegisteredSealProof::StackedDRG2KiBV1P1);
        assert_eq!(sector.pieces.len(), 1);
        assert!(compute_commitment(&sector.pieces, sector.seal_proof).is_ok());

        let tmp_dir = tempfile::tempdir().unwrap();
        let db = PipelineDB::new(tmp_dir.path()).unwrap();
        db.insert_sector(&sector.entry(), &sector.pieces).unwrap();

        let stored = db.sector(sector.entry().sector_id()).unwrap().unwrap();
        assert!(stored.needs_sdr());
        assert_eq!(db.pieces(stored.sector_id()).unwrap(), sector.pieces);
    }

    #[test]
    fn sector_without_pieces() {
        let file = write_sector(r#"{ "sp_id": 1, "sector_number": 2, "seal_proof": "32GiB" }"#);
        let sector = SectorFile::load(file.path()).unwrap();
        assert!(sector.pieces.is_empty());
        assert_eq!(sector.entry().sector_id().to_string(), "s-t01-2");
    }

    #[test]
    fn unknown_field() {
        let file = write_sector(
            r#"{ "sp_id": 1, "sector_number": 2, "seal_proof": "2KiB", "deal_id": 3 }"#,
        );
        assert!(matches!(
            SectorFile::load(file.path()),
            Err(WorkerError::Json(_))
        ));
    }
}
