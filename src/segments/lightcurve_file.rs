//! Access to TESS light-curve files through `cfitsio`.
//!
//! SPOC light-curve products keep the observation keywords in two places: `SECTOR` in the
//! primary header, the PDC quality pair and the time span in the `LIGHTCURVE` binary table
//! (HDU 1), next to the sample columns. [`LightCurveFile`] hides that split.
//!
//! Before anything is read, the data size declared by each header is recomputed with checked
//! arithmetic and compared with the file length, so a corrupt header is reported as
//! [`PipelineError::FitsFormat`] instead of sizing a read after absurd dimensions.
use camino::Utf8Path;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::headers::ReadsKey;
use fitsio::tables::ReadsCol;
use fitsio::FitsFile;

use crate::pipeline_errors::PipelineError;

/// An open light-curve file.
pub struct LightCurveFile {
    fptr: FitsFile,
    primary: FitsHdu,
    /// First extension, when the file has one
    table: Option<FitsHdu>,
}

impl LightCurveFile {
    /// Open `path` and validate the declared size of its first two HDUs.
    pub fn open(path: &Utf8Path) -> Result<Self, PipelineError> {
        let file_len = std::fs::metadata(path)?.len();
        let mut fptr = FitsFile::open(path)?;

        let primary = fptr.primary_hdu()?;
        check_data_extent(&primary, &mut fptr, file_len)?;
        let table = match fptr.hdu(1) {
            Ok(hdu) => {
                check_data_extent(&hdu, &mut fptr, file_len)?;
                Some(hdu)
            }
            Err(_) => None,
        };

        Ok(LightCurveFile {
            fptr,
            primary,
            table,
        })
    }

    /// Keyword of the table extension, falling back on the primary header.
    pub fn key<T: ReadsKey>(&mut self, keyword: &str) -> Option<T> {
        self.table
            .as_ref()
            .and_then(|hdu| hdu.read_key(&mut self.fptr, keyword).ok())
            .or_else(|| self.primary.read_key(&mut self.fptr, keyword).ok())
    }

    /// Number of rows of the table extension.
    pub fn n_rows(&self) -> Option<usize> {
        match self.table.as_ref().map(|hdu| &hdu.info) {
            Some(HduInfo::TableInfo { num_rows, .. }) => Some(*num_rows),
            _ => None,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        match self.table.as_ref().map(|hdu| &hdu.info) {
            Some(HduInfo::TableInfo {
                column_descriptions,
                ..
            }) => column_descriptions.iter().any(|c| c.name == name),
            _ => false,
        }
    }

    /// Whole column `name` of the table extension, converted by cfitsio to `T`.
    pub fn column<T: ReadsCol>(&mut self, name: &str) -> Result<Vec<T>, PipelineError> {
        let table = self.table.as_ref().ok_or_else(|| {
            PipelineError::FitsFormat("no binary table extension after the primary HDU".into())
        })?;
        if !self.has_column(name) {
            return Err(PipelineError::FitsFormat(format!("no column named {name}")));
        }
        Ok(table.read_col(&mut self.fptr, name)?)
    }
}

fn header_int(hdu: &FitsHdu, fptr: &mut FitsFile, keyword: &str) -> Result<i64, PipelineError> {
    hdu.read_key::<i64>(fptr, keyword)
        .map_err(|e| PipelineError::FitsFormat(format!("{keyword}: {e}")))
}

fn non_negative(keyword: &str, value: i64) -> Result<u64, PipelineError> {
    u64::try_from(value)
        .map_err(|_| PipelineError::FitsFormat(format!("{keyword} = {value} is negative")))
}

/// Bytes of data declared by a header:
/// `|BITPIX| / 8 × GCOUNT × (PCOUNT + NAXIS1 × … × NAXISn)`.
fn declared_data_len(hdu: &FitsHdu, fptr: &mut FitsFile) -> Result<u64, PipelineError> {
    let overflow = || PipelineError::FitsFormat("declared data size overflows".into());

    let bitpix = header_int(hdu, fptr, "BITPIX")?;
    let naxis = non_negative("NAXIS", header_int(hdu, fptr, "NAXIS")?)?;
    if naxis == 0 {
        return Ok(0);
    }
    let mut elements: u64 = 1;
    for axis in 1..=naxis {
        let keyword = format!("NAXIS{axis}");
        let n = non_negative(&keyword, header_int(hdu, fptr, &keyword)?)?;
        elements = elements.checked_mul(n).ok_or_else(overflow)?;
    }
    let pcount = non_negative("PCOUNT", header_int(hdu, fptr, "PCOUNT").unwrap_or(0))?;
    let gcount = non_negative("GCOUNT", header_int(hdu, fptr, "GCOUNT").unwrap_or(1))?;

    (bitpix.unsigned_abs() / 8)
        .checked_mul(gcount)
        .and_then(|n| n.checked_mul(pcount.checked_add(elements)?))
        .ok_or_else(overflow)
}

fn check_data_extent(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    file_len: u64,
) -> Result<(), PipelineError> {
    let data_len = declared_data_len(hdu, fptr)?;
    if data_len > file_len {
        return Err(PipelineError::FitsFormat(format!(
            "header declares {data_len} data bytes, the file holds {file_len}"
        )));
    }
    Ok(())
}

/// Writers of small light-curve files for unit tests.
#[cfg(test)]
pub(crate) mod test_files {
    use camino::Utf8Path;
    use fitsio::tables::{ColumnDataType, ColumnDescription};
    use fitsio::FitsFile;

    /// SPOC-like file: `SECTOR` in the primary header when given, `table_keys` in the
    /// `LIGHTCURVE` table holding `TIME` (D), `PDCSAP_FLUX`, `PDCSAP_FLUX_ERR`, `SAP_FLUX` (E)
    /// and `QUALITY` (J).
    pub(crate) fn write_lightcurve(
        path: &Utf8Path,
        sector: Option<i64>,
        table_keys: &[(&str, f64)],
        time: &[f64],
        flux: &[f32],
        quality: &[i32],
    ) {
        let mut fptr = FitsFile::create(path).open().unwrap();
        if let Some(sector) = sector {
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "SECTOR", sector).unwrap();
        }

        let column = |name: &str, kind: ColumnDataType| {
            ColumnDescription::new(name).with_type(kind).create().unwrap()
        };
        let columns = [
            column("TIME", ColumnDataType::Double),
            column("PDCSAP_FLUX", ColumnDataType::Float),
            column("PDCSAP_FLUX_ERR", ColumnDataType::Float),
            column("SAP_FLUX", ColumnDataType::Float),
            column("QUALITY", ColumnDataType::Int),
        ];
        let hdu = fptr.create_table("LIGHTCURVE", &columns).unwrap();
        for (key, value) in table_keys {
            hdu.write_key(&mut fptr, key, *value).unwrap();
        }

        let flux_err: Vec<f32> = flux.iter().map(|f| f * 0.001).collect();
        hdu.write_col(&mut fptr, "TIME", time).unwrap();
        hdu.write_col(&mut fptr, "PDCSAP_FLUX", flux).unwrap();
        hdu.write_col(&mut fptr, "PDCSAP_FLUX_ERR", &flux_err).unwrap();
        hdu.write_col(&mut fptr, "SAP_FLUX", flux).unwrap();
        hdu.write_col(&mut fptr, "QUALITY", quality).unwrap();
    }

    /// One header block whose `NAXIS1 × NAXIS2` exceeds 64 bits.
    pub(crate) fn write_oversized_header(path: &Utf8Path) {
        let mut block = String::new();
        for card in [
            "SIMPLE  =                    T",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =           4294967296",
            "NAXIS2  =           4294967296",
            "END",
        ] {
            block.push_str(&format!("{card:<80}"));
        }
        let mut bytes = block.into_bytes();
        bytes.resize(2880, b' ');
        std::fs::write(path, bytes).unwrap();
    }
}
