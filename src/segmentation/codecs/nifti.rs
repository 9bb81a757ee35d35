//! NIfTI-1 single-file volumes (`.nii`, `.nii.gz`).
//!
//! Reads little- and big-endian files with integer or float voxels and
//! converts them to 16-bit labels. Writes gzip-compressed little-endian files
//! with `uint8` voxels when every label fits, `uint16` otherwise, and an
//! sform affine built from the volume geometry.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::{Array3, ShapeBuilder};

use crate::model::VolumeGeometry;
use crate::segmentation::CodecError;
use crate::segmentation::codec::{MaskCodec, MaskImage};

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_INT8: i16 = 256;
const DT_UINT16: i16 = 512;
const DT_UINT32: i16 = 768;

/// NIfTI-1 mask codec.
pub struct NiftiCodec;

impl MaskCodec for NiftiCodec {
    fn id(&self) -> &'static str {
        "nifti"
    }

    fn display_name(&self) -> &'static str {
        "NIfTI-1 Volume"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["nii.gz", "nii"]
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        if data.starts_with(&GZIP_MAGIC) {
            return true;
        }
        data.len() >= HEADER_SIZE
            && data[344..347] == *b"n+1"
            && Endian::detect(data).is_some()
    }

    fn decode(&self, data: &[u8]) -> Result<MaskImage, CodecError> {
        let raw;
        let bytes = if data.starts_with(&GZIP_MAGIC) {
            let mut buf = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut buf)
                .map_err(|e| CodecError::corrupt(format!("gzip: {e}")))?;
            raw = buf;
            raw.as_slice()
        } else {
            data
        };
        read_volume(bytes)
    }

    fn encode(&self, image: &MaskImage, binary: bool) -> Result<Vec<u8>, CodecError> {
        let raw = write_volume(image, binary)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| CodecError::corrupt(format!("gzip: {e}")))
    }

    fn supports_volumes(&self) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        10
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn detect(data: &[u8]) -> Option<Self> {
        let size = data.get(0..4)?;
        if LittleEndian::read_i32(size) == HEADER_SIZE as i32 {
            Some(Endian::Little)
        } else if BigEndian::read_i32(size) == HEADER_SIZE as i32 {
            Some(Endian::Big)
        } else {
            None
        }
    }
}

/// The NIfTI-1 header fields masks need.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    dim: [i16; 8],
    datatype: i16,
    bitpix: i16,
    pixdim: [f32; 8],
    vox_offset: f32,
    scl_slope: f32,
    scl_inter: f32,
    qform_code: i16,
    sform_code: i16,
    quatern: [f32; 3],
    qoffset: [f32; 3],
    srow: [[f32; 4]; 3],
}

impl Header {
    fn read<E: ByteOrder>(data: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(data);

        cursor.set_position(40);
        let mut dim = [0i16; 8];
        cursor.read_i16_into::<E>(&mut dim)?;

        cursor.set_position(70);
        let datatype = cursor.read_i16::<E>()?;
        let bitpix = cursor.read_i16::<E>()?;

        cursor.set_position(76);
        let mut pixdim = [0f32; 8];
        cursor.read_f32_into::<E>(&mut pixdim)?;
        let vox_offset = cursor.read_f32::<E>()?;
        let scl_slope = cursor.read_f32::<E>()?;
        let scl_inter = cursor.read_f32::<E>()?;

        cursor.set_position(252);
        let qform_code = cursor.read_i16::<E>()?;
        let sform_code = cursor.read_i16::<E>()?;
        let mut quatern = [0f32; 3];
        cursor.read_f32_into::<E>(&mut quatern)?;
        let mut qoffset = [0f32; 3];
        cursor.read_f32_into::<E>(&mut qoffset)?;
        let mut srow = [[0f32; 4]; 3];
        for row in &mut srow {
            cursor.read_f32_into::<E>(row)?;
        }

        Ok(Self {
            dim,
            datatype,
            bitpix,
            pixdim,
            vox_offset,
            scl_slope,
            scl_inter,
            qform_code,
            sform_code,
            quatern,
            qoffset,
            srow,
        })
    }

    /// Little-endian header padded to the voxel data offset.
    fn write(&self) -> io::Result<Vec<u8>> {
        let mut cursor = Cursor::new(vec![0u8; DATA_OFFSET]);
        cursor.write_i32::<LittleEndian>(HEADER_SIZE as i32)?;

        cursor.set_position(40);
        for value in self.dim {
            cursor.write_i16::<LittleEndian>(value)?;
        }

        cursor.set_position(70);
        cursor.write_i16::<LittleEndian>(self.datatype)?;
        cursor.write_i16::<LittleEndian>(self.bitpix)?;

        cursor.set_position(76);
        for value in self.pixdim {
            cursor.write_f32::<LittleEndian>(value)?;
        }
        cursor.write_f32::<LittleEndian>(self.vox_offset)?;
        cursor.write_f32::<LittleEndian>(self.scl_slope)?;
        cursor.write_f32::<LittleEndian>(self.scl_inter)?;

        // xyzt_units: millimetres
        cursor.set_position(123);
        cursor.write_u8(2)?;

        cursor.set_position(252);
        cursor.write_i16::<LittleEndian>(self.qform_code)?;
        cursor.write_i16::<LittleEndian>(self.sform_code)?;
        for value in self.quatern.into_iter().chain(self.qoffset) {
            cursor.write_f32::<LittleEndian>(value)?;
        }
        for value in self.srow.into_iter().flatten() {
            cursor.write_f32::<LittleEndian>(value)?;
        }

        cursor.set_position(344);
        cursor.write_all(b"n+1\0")?;
        Ok(cursor.into_inner())
    }

    fn voxel_width(&self) -> Option<usize> {
        match self.datatype {
            DT_UINT8 | DT_INT8 => Some(1),
            DT_INT16 | DT_UINT16 => Some(2),
            DT_INT32 | DT_UINT32 | DT_FLOAT32 => Some(4),
            DT_FLOAT64 => Some(8),
            _ => None,
        }
    }
}

fn read_volume(data: &[u8]) -> Result<MaskImage, CodecError> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::corrupt("file is shorter than a NIfTI-1 header"));
    }
    let endian = Endian::detect(data)
        .ok_or_else(|| CodecError::corrupt("sizeof_hdr is not 348 in either byte order"))?;
    let header = match endian {
        Endian::Little => Header::read::<LittleEndian>(data),
        Endian::Big => Header::read::<BigEndian>(data),
    }
    .map_err(|e| CodecError::corrupt(format!("NIfTI header: {e}")))?;

    let ndim = header.dim[0];
    let dims = &header.dim[1..];
    if !(1..=7).contains(&ndim) {
        return Err(CodecError::corrupt(format!("invalid dimension count {ndim}")));
    }
    let ndim = ndim as usize;
    if ndim > 3 && dims[3..ndim].iter().any(|&d| d > 1) {
        return Err(CodecError::corrupt(format!(
            "{ndim}-dimensional masks are not supported"
        )));
    }
    let extent = |axis: usize| -> Result<usize, CodecError> {
        if axis >= ndim {
            return Ok(1);
        }
        usize::try_from(dims[axis])
            .ok()
            .filter(|&d| d > 0)
            .ok_or_else(|| CodecError::corrupt(format!("dim[{}] = {}", axis + 1, dims[axis])))
    };
    let (nx, ny, nz) = (extent(0)?, extent(1)?, extent(2)?);

    let width = header.voxel_width().ok_or_else(|| {
        CodecError::corrupt(format!("unsupported NIfTI datatype {}", header.datatype))
    })?;

    let offset = if header.vox_offset.is_finite() && header.vox_offset >= HEADER_SIZE as f32 {
        header.vox_offset as usize
    } else {
        DATA_OFFSET
    };
    let count = nx
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(nz))
        .ok_or_else(|| CodecError::corrupt("volume extent overflows"))?;
    let end = count
        .checked_mul(width)
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| CodecError::corrupt(format!("voxel offset {offset} is out of range")))?;
    let payload = data
        .get(offset..end)
        .ok_or_else(|| CodecError::corrupt("voxel data is truncated"))?;

    let raw = match endian {
        Endian::Little => read_voxels::<LittleEndian>(payload, header.datatype, count),
        Endian::Big => read_voxels::<BigEndian>(payload, header.datatype, count),
    }
    .map_err(|e| CodecError::corrupt(format!("voxel data: {e}")))?;

    let slope = f64::from(header.scl_slope);
    let inter = f64::from(header.scl_inter);
    let scale = (slope != 0.0 && slope.is_finite() && (slope != 1.0 || inter != 0.0))
        .then_some((slope, inter));

    let mut values = Vec::with_capacity(count);
    for raw in raw {
        let scaled = match scale {
            Some((slope, inter)) => raw * slope + inter,
            None => raw,
        };
        let rounded = scaled.round();
        if !(0.0..=f64::from(u16::MAX)).contains(&rounded) {
            return Err(CodecError::corrupt(format!(
                "voxel value {scaled} is not a valid label"
            )));
        }
        values.push(rounded as u16);
    }

    let labels = Array3::from_shape_vec((nx, ny, nz).f(), values)
        .map_err(|e| CodecError::corrupt(e.to_string()))?;

    Ok(MaskImage {
        labels,
        geometry: Some(read_geometry(&header)),
    })
}

fn read_voxels<E: ByteOrder>(payload: &[u8], datatype: i16, count: usize) -> io::Result<Vec<f64>> {
    let mut cursor = Cursor::new(payload);
    (0..count)
        .map(|_| match datatype {
            DT_UINT8 => cursor.read_u8().map(f64::from),
            DT_INT8 => cursor.read_i8().map(f64::from),
            DT_INT16 => cursor.read_i16::<E>().map(f64::from),
            DT_UINT16 => cursor.read_u16::<E>().map(f64::from),
            DT_INT32 => cursor.read_i32::<E>().map(f64::from),
            DT_UINT32 => cursor.read_u32::<E>().map(f64::from),
            DT_FLOAT32 => cursor.read_f32::<E>().map(f64::from),
            _ => cursor.read_f64::<E>(),
        })
        .collect()
}

/// Voxel to world mapping from sform, then qform, then pixdim.
fn read_geometry(header: &Header) -> VolumeGeometry {
    let pixdim = header.pixdim.map(f64::from);
    let spacing = [1, 2, 3].map(|i| {
        if pixdim[i].is_finite() && pixdim[i] > 0.0 {
            pixdim[i]
        } else {
            1.0
        }
    });

    if header.sform_code > 0 {
        let rows = header.srow.map(|row| row.map(f64::from));
        if rows.iter().flatten().all(|v| v.is_finite()) {
            return VolumeGeometry::from_affine(rows);
        }
    }

    if header.qform_code > 0 {
        let [b, c, d] = header.quatern.map(f64::from);
        let offset = header.qoffset.map(f64::from);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let mut direction = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        for row in &mut direction {
            row[2] *= qfac;
        }
        return VolumeGeometry::new(offset, spacing, direction);
    }

    VolumeGeometry::new([0.0; 3], spacing, VolumeGeometry::IDENTITY.direction)
}

fn write_volume(image: &MaskImage, binary: bool) -> Result<Vec<u8>, CodecError> {
    let labels = &image.labels;
    let (nx, ny, nz) = labels.dim();
    let extent = |d: usize| {
        i16::try_from(d)
            .map_err(|_| CodecError::Unsupported(format!("extent {d} exceeds NIfTI-1 limits")))
    };
    let (dx, dy, dz) = (extent(nx)?, extent(ny)?, extent(nz)?);

    let max = labels.iter().copied().max().unwrap_or(0);
    let (datatype, bitpix): (i16, i16) = if binary || max <= u16::from(u8::MAX) {
        (DT_UINT8, 8)
    } else {
        (DT_UINT16, 16)
    };

    let geometry = image.geometry.unwrap_or_default();
    let [sx, sy, sz] = geometry.spacing;
    let srow = std::array::from_fn(|r| {
        let direction = geometry.direction[r];
        [
            (direction[0] * sx) as f32,
            (direction[1] * sy) as f32,
            (direction[2] * sz) as f32,
            geometry.origin[r] as f32,
        ]
    });
    let header = Header {
        dim: [3, dx, dy, dz, 1, 1, 1, 1],
        datatype,
        bitpix,
        pixdim: [1.0, sx as f32, sy as f32, sz as f32, 1.0, 1.0, 1.0, 1.0],
        vox_offset: DATA_OFFSET as f32,
        scl_slope: 1.0,
        scl_inter: 0.0,
        qform_code: 0,
        sform_code: 1,
        quatern: [0.0; 3],
        qoffset: [0.0; 3],
        srow,
    };

    let mut out = header.write().map_err(write_error)?;
    out.reserve(labels.len() * usize::from(bitpix.unsigned_abs() / 8));
    // Fortran order: i varies fastest.
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let value = labels[[i, j, k]];
                let value = if binary { u16::from(value != 0) } else { value };
                if datatype == DT_UINT8 {
                    out.write_u8(value as u8).map_err(write_error)?;
                } else {
                    out.write_u16::<LittleEndian>(value).map_err(write_error)?;
                }
            }
        }
    }
    Ok(out)
}

fn write_error(err: io::Error) -> CodecError {
    CodecError::corrupt(format!("NIfTI write: {err}"))
}
