//! Serialization of data into the std140 layout format, suitable for use in
//! uniform buffers, as described in:
//!
//! https://www.oreilly.com/library/view/opengl-programming-guide/9780132748445/app09lev1sec2.html

use vek::*;


/// Type which can serialize into the std140 layout format, suitable for use
/// in uniform buffers. Furthermore, these types have a _statically_ known size
/// and alignment.
pub trait Std140: Sized + Clone {
    /// Required alignment of this type in the uniform buffer.
    const ALIGN: usize;

    /// Amount of size this type takes in the uniform buffer.
    const SIZE: usize;

    /// Serialize self into uniform buffer data. Writes exactly `Self::SIZE`
    /// bytes to `dst`. Assumes `dst.len()` is a multiple of `Self::ALIGN`.
    fn write(&self, dst: &mut Vec<u8>);

    /// Write the necessary number of padding bytes to `dst` so as to ensure
    /// necessary alignment, then write self to `dst`. Returns the index in
    /// `dst` where started writing self's actual data (not self's padding
    /// bytes).
    fn pad_write(&self, dst: &mut Vec<u8>) -> usize {
        while dst.len() % Self::ALIGN != 0 {
            dst.push(0);
        }
        let offset = dst.len();
        self.write(dst);
        offset
    }
}

/// Serialize a value as the entire contents of a uniform buffer.
pub fn to_bytes<T: Std140>(val: &T) -> Vec<u8> {
    let mut dst = Vec::with_capacity(T::SIZE);
    val.write(&mut dst);
    dst
}

/// Round `n` up to a multiple of the size of a vec4.
pub const fn round_to_vec4(n: usize) -> usize {
    if n % 16 == 0 {
        n
    } else {
        n - (n % 16) + 16
    }
}

// scalars

impl Std140 for bool {
    // bools take 4 bytes, not 1
    const ALIGN: usize = 4;
    const SIZE: usize = 4;

    fn write(&self, dst: &mut Vec<u8>) {
        (*self as u32).write(dst);
    }
}

macro_rules! std140_scalar {
    ($($type:ty),*)=>{$(
        impl Std140 for $type {
            const ALIGN: usize = 4;
            const SIZE: usize = 4;

            fn write(&self, dst: &mut Vec<u8>) {
                dst.extend(self.to_le_bytes());
            }
        }
    )*};
}

std140_scalar!(f32, i32, u32);

// vectors
//
// "both the size and alignment are twice the size of the underlying scalar
// type" for 2-vectors, "four times" for 3- and 4-vectors

macro_rules! std140_vec {
    ($type:ident, $n:expr, $align:expr, $($c:ident),*)=>{
        impl<T: Std140 + Copy> Std140 for $type<T> {
            const ALIGN: usize = T::SIZE * $align;
            const SIZE: usize = T::SIZE * $n;

            fn write(&self, dst: &mut Vec<u8>) {
                $( self.$c.write(dst); )*
            }
        }
    };
}

std140_vec!(Vec2, 2, 2, x, y);
std140_vec!(Vec3, 3, 4, x, y, z);
std140_vec!(Rgb, 3, 4, r, g, b);
std140_vec!(Vec4, 4, 4, x, y, z, w);
std140_vec!(Rgba, 4, 4, r, g, b, a);

// arrays
//
// "the size of each element in the array will be the size of the element
// type, rounded up to a multiple of the size of a vec4. this is also the
// array's alignment."

const fn arr_stride(elem_size: usize) -> usize {
    round_to_vec4(elem_size)
}

impl<T: Std140, const LEN: usize> Std140 for [T; LEN] {
    const ALIGN: usize = round_to_vec4(T::ALIGN);
    const SIZE: usize = arr_stride(T::SIZE) * LEN;

    fn write(&self, dst: &mut Vec<u8>) {
        for elem in self {
            let start = dst.len();
            elem.write(dst);
            while dst.len() < start + arr_stride(T::SIZE) {
                dst.push(0);
            }
        }
    }
}

// matrices
//
// column-major, laid out as an array of column vectors

impl Std140 for Mat4<f32> {
    const ALIGN: usize = <[Vec4<f32>; 4]>::ALIGN;
    const SIZE: usize = <[Vec4<f32>; 4]>::SIZE;

    fn write(&self, dst: &mut Vec<u8>) {
        let cols: [Vec4<f32>; 4] = self.cols.into_array();
        cols.write(dst);
    }
}

// structures

/// Macro for implementing `Std140` on a struct of types which implement
/// `Std140`.
#[macro_export]
macro_rules! std140_struct {
    ($struct:ident {$(
        $field:ident: $type:ty
    ),*$(,)?})=>{
        impl $crate::std140::Std140 for $struct {
            // "structure alignment will be the alignment for the biggest
            // structure member, according to the previous rules, rounded up
            // to a multiple of the size of a vec4"
            const ALIGN: usize = {
                let mut align = 0;
                $(
                let field_align = <$type as $crate::std140::Std140>::ALIGN;
                if field_align > align {
                    align = field_align;
                }
                )*
                $crate::std140::round_to_vec4(align)
            };

            // "its size will be the space needed by its members, according to
            // the previous rules, rounded up to a multiple of the structure
            // alignment"
            const SIZE: usize = {
                let mut size = 0;
                $(
                let field_align = <$type as $crate::std140::Std140>::ALIGN;
                let field_size = <$type as $crate::std140::Std140>::SIZE;
                if size % field_align != 0 {
                    size += field_align - (size % field_align);
                }
                size += field_size;
                )*
                if size % Self::ALIGN != 0 {
                    size += Self::ALIGN - (size % Self::ALIGN);
                }
                size
            };

            fn write(&self, dst: &mut Vec<u8>) {
                let len_before = dst.len();
                $(
                <$type as $crate::std140::Std140>::pad_write(&self.$field, dst);
                )*
                while dst.len() < len_before + Self::SIZE {
                    dst.push(0);
                }
            }
        }
    };
}
