//! Native TIFF reading/writing for label and probability volumes
//!
//! Uses the `tiff` crate. A single-page file is a 2-D `(rows, cols)`
//! volume, a multi-page file is a 3-D `(slices, rows, cols)` volume.
//! Voxel spacing and origin travel in the ModelPixelScale / ModelTiepoint
//! tags so other GeoTIFF-aware tools keep the grid aligned.

use crate::error::{Error, Result};
use crate::volume::{Geometry, Volume, VoxelElement};
use num_traits::NumCast;
use std::fmt::Debug;
use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray16, Gray32, Gray32Float, Gray8};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// Sample format used when encoding a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Smallest unsigned integer format that holds every value, or
    /// 32-bit float for float volumes and negative labels
    #[default]
    Auto,
    UInt8,
    UInt16,
    UInt32,
    Float32,
}

/// Options for writing volumes
#[derive(Debug, Clone, Default)]
pub struct VolumeWriteOptions {
    pub sample_format: SampleFormat,
}

/// Read a TIFF file into a Volume
pub fn read_volume<T, P>(path: P) -> Result<Volume<T>>
where
    T: VoxelElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_volume(file)
}

/// Read a TIFF from an in-memory buffer into a Volume
pub fn read_volume_from_buffer<T>(data: &[u8]) -> Result<Volume<T>>
where
    T: VoxelElement,
{
    decode_volume(Cursor::new(data))
}

fn cast_all<S, T>(buf: &[S]) -> Result<Vec<T>>
where
    S: NumCast + Copy + Debug,
    T: VoxelElement,
{
    buf.iter()
        .map(|&v| {
            num_traits::cast(v).ok_or_else(|| {
                Error::UnsupportedDataType(format!(
                    "value {:?} does not fit the requested voxel type",
                    v
                ))
            })
        })
        .collect()
}

fn decode_volume<T, R>(reader: R) -> Result<Volume<T>>
where
    T: VoxelElement,
    R: Read + Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let (rows, cols) = (height as usize, width as usize);

    // Tags live on the first IFD; read them before advancing.
    let tags = read_geometry_tags(&mut decoder)?;

    let mut data: Vec<T> = Vec::with_capacity(rows * cols);
    let mut pages = 0usize;
    loop {
        let dims = decoder
            .dimensions()
            .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
        if dims != (width, height) {
            return Err(Error::Other(format!(
                "page {} is {}x{}, first page is {}x{}",
                pages, dims.0, dims.1, width, height
            )));
        }

        let result = decoder
            .read_image()
            .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

        let page: Vec<T> = match result {
            DecodingResult::U8(buf) => cast_all(&buf)?,
            DecodingResult::U16(buf) => cast_all(&buf)?,
            DecodingResult::U32(buf) => cast_all(&buf)?,
            DecodingResult::U64(buf) => cast_all(&buf)?,
            DecodingResult::I8(buf) => cast_all(&buf)?,
            DecodingResult::I16(buf) => cast_all(&buf)?,
            DecodingResult::I32(buf) => cast_all(&buf)?,
            DecodingResult::I64(buf) => cast_all(&buf)?,
            DecodingResult::F32(buf) => cast_all(&buf)?,
            DecodingResult::F64(buf) => cast_all(&buf)?,
            #[allow(unreachable_patterns)]
            _ => {
                return Err(Error::UnsupportedDataType(
                    "Unsupported TIFF pixel format".to_string(),
                ))
            }
        };

        if page.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                shape: vec![rows, cols],
                len: page.len(),
            });
        }
        data.extend(page);
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| Error::Other(format!("Cannot advance to page {}: {}", pages, e)))?;
    }

    let shape = if pages == 1 {
        vec![rows, cols]
    } else {
        vec![pages, rows, cols]
    };
    let mut volume = Volume::from_vec(data, &shape)?;

    if let Some((scale, tiepoint)) = tags {
        volume.set_geometry(geometry_from_tags(shape.len(), &scale, &tiepoint))?;
    }

    Ok(volume)
}

/// ModelPixelScale and ModelTiepoint payloads of the current page.
///
/// `Ok(None)` when neither tag is present; a lone tag, an unreadable tag or a
/// short payload is an error rather than a silently dropped geometry.
fn read_geometry_tags<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
    let scale = read_f64_tag(decoder, Tag::ModelPixelScaleTag)?;
    let tiepoint = read_f64_tag(decoder, Tag::ModelTiepointTag)?;
    match (scale, tiepoint) {
        (None, None) => Ok(None),
        (Some(scale), Some(tiepoint)) if scale.len() >= 3 && tiepoint.len() >= 6 => {
            Ok(Some((scale, tiepoint)))
        }
        (Some(scale), Some(tiepoint)) => Err(Error::Other(format!(
            "geometry tags too short: {} scale values, {} tiepoint values",
            scale.len(),
            tiepoint.len()
        ))),
        (Some(_), None) => Err(Error::Other(
            "ModelPixelScale tag present without ModelTiepoint".to_string(),
        )),
        (None, Some(_)) => Err(Error::Other(
            "ModelTiepoint tag present without ModelPixelScale".to_string(),
        )),
    }
}

fn read_f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<Vec<f64>>> {
    decoder
        .find_tag(tag)
        .and_then(|value| value.map(|v| v.into_f64_vec()).transpose())
        .map_err(|e| Error::Other(format!("Cannot read {:?}: {}", tag, e)))
}

/// scale: [sx, sy, sz], tiepoint: [I, J, K, X, Y, Z]; volume axes run (z, y, x).
fn geometry_from_tags(ndim: usize, scale: &[f64], tiepoint: &[f64]) -> Geometry {
    let positive = |s: f64| if s.is_finite() && s > 0.0 { s } else { 1.0 };
    let origin_x = tiepoint[3] - tiepoint[0] * positive(scale[0]);
    let origin_y = tiepoint[4] - tiepoint[1] * positive(scale[1]);
    if ndim == 3 {
        Geometry::new(
            vec![positive(scale[2]), positive(scale[1]), positive(scale[0])],
            vec![tiepoint[5], origin_y, origin_x],
        )
    } else {
        Geometry::new(
            vec![positive(scale[1]), positive(scale[0])],
            vec![origin_y, origin_x],
        )
    }
}

/// Write a Volume to a TIFF file
pub fn write_volume<T, P>(
    volume: &Volume<T>,
    path: P,
    options: Option<VolumeWriteOptions>,
) -> Result<()>
where
    T: VoxelElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_volume(volume, file, options.unwrap_or_default())
}

/// Write a Volume to an in-memory TIFF buffer
pub fn write_volume_to_buffer<T>(
    volume: &Volume<T>,
    options: Option<VolumeWriteOptions>,
) -> Result<Vec<u8>>
where
    T: VoxelElement,
{
    let mut buf = Vec::new();
    encode_volume(volume, Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

fn resolve_format<T: VoxelElement>(volume: &Volume<T>, format: SampleFormat) -> SampleFormat {
    if format != SampleFormat::Auto {
        return format;
    }
    if T::is_float() {
        return SampleFormat::Float32;
    }
    let stats = volume.statistics();
    let min = stats.min.and_then(|v| v.to_f64()).unwrap_or(0.0);
    let max = stats.max.and_then(|v| v.to_f64()).unwrap_or(0.0);
    if min < 0.0 {
        SampleFormat::Float32
    } else if max <= u8::MAX as f64 {
        SampleFormat::UInt8
    } else if max <= u16::MAX as f64 {
        SampleFormat::UInt16
    } else if max <= u32::MAX as f64 {
        SampleFormat::UInt32
    } else {
        SampleFormat::Float32
    }
}

fn encode_volume<T, W>(volume: &Volume<T>, writer: W, options: VolumeWriteOptions) -> Result<()>
where
    T: VoxelElement,
    W: Write + Seek,
{
    let (pages, rows, cols) = match *volume.shape() {
        [rows, cols] => (1, rows, cols),
        [pages, rows, cols] => (pages, rows, cols),
        _ => {
            return Err(Error::UnsupportedDataType(format!(
                "TIFF output supports 2-D and 3-D volumes, got {} axes",
                volume.ndim()
            )))
        }
    };
    if pages * rows * cols == 0 {
        return Err(Error::InvalidDimensions {
            shape: volume.shape().to_vec(),
            len: 0,
        });
    }

    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;
    let layout = PageLayout {
        rows,
        cols,
        geometry: volume.geometry(),
    };

    match resolve_format(volume, options.sample_format) {
        SampleFormat::UInt8 => {
            write_pages::<Gray8, _>(&mut encoder, &layout, &cast_all::<T, u8>(volume.values())?)
        }
        SampleFormat::UInt16 => {
            write_pages::<Gray16, _>(&mut encoder, &layout, &cast_all::<T, u16>(volume.values())?)
        }
        SampleFormat::UInt32 => {
            write_pages::<Gray32, _>(&mut encoder, &layout, &cast_all::<T, u32>(volume.values())?)
        }
        SampleFormat::Float32 | SampleFormat::Auto => {
            let data: Vec<f32> = volume
                .values()
                .iter()
                .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
                .collect();
            write_pages::<Gray32Float, _>(&mut encoder, &layout, &data)
        }
    }
}

struct PageLayout<'a> {
    rows: usize,
    cols: usize,
    geometry: &'a Geometry,
}

impl PageLayout<'_> {
    /// (scale, tiepoint) tag payloads for the first page
    fn tags(&self) -> (Vec<f64>, Vec<f64>) {
        let g = self.geometry;
        let n = g.spacing.len();
        let (sz, oz) = if n == 3 { (g.spacing[0], g.origin[0]) } else { (0.0, 0.0) };
        let scale = vec![g.spacing[n - 1], g.spacing[n - 2], sz];
        let tiepoint = vec![0.0, 0.0, 0.0, g.origin[n - 1], g.origin[n - 2], oz];
        (scale, tiepoint)
    }
}

fn write_pages<C, W>(
    encoder: &mut TiffEncoder<W>,
    layout: &PageLayout<'_>,
    data: &[C::Inner],
) -> Result<()>
where
    C: ColorType,
    W: Write + Seek,
    [C::Inner]: TiffValue,
{
    let (scale, tiepoint) = layout.tags();
    for (i, page) in data.chunks(layout.rows * layout.cols).enumerate() {
        let mut image = encoder
            .new_image::<C>(layout.cols as u32, layout.rows as u32)
            .map_err(|e| Error::Other(format!("Cannot create TIFF page {}: {}", i, e)))?;

        if i == 0 {
            image
                .encoder()
                .write_tag(Tag::ModelPixelScaleTag, scale.as_slice())
                .map_err(|e| Error::Other(format!("Cannot write scale tag: {}", e)))?;
            image
                .encoder()
                .write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())
                .map_err(|e| Error::Other(format!("Cannot write tiepoint tag: {}", e)))?;
        }

        image
            .write_data(page)
            .map_err(|e| Error::Other(format!("Cannot write page {}: {}", i, e)))?;
    }
    Ok(())
}
