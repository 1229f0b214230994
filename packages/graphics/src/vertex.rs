//! Serialization of data into vertex and index buffers.

use vek::*;


/// Type which can be written into a vertex or index buffer, little-endian
/// and tightly packed.
pub trait VertexData {
    /// Number of scalar components, for attribute declarations.
    const COMPONENTS: u32;

    fn write(&self, dst: &mut Vec<u8>);
}

macro_rules! vertex_scalar {
    ($($type:ty),*)=>{$(
        impl VertexData for $type {
            const COMPONENTS: u32 = 1;

            fn write(&self, dst: &mut Vec<u8>) {
                dst.extend(self.to_le_bytes());
            }
        }
    )*};
}

vertex_scalar!(f32, u16, u32);

macro_rules! vertex_vec {
    ($type:ident, $n:expr, $($c:ident),*)=>{
        impl<T: VertexData> VertexData for $type<T> {
            const COMPONENTS: u32 = T::COMPONENTS * $n;

            fn write(&self, dst: &mut Vec<u8>) {
                $( self.$c.write(dst); )*
            }
        }
    };
}

vertex_vec!(Vec2, 2, x, y);
vertex_vec!(Vec3, 3, x, y, z);
vertex_vec!(Vec4, 4, x, y, z, w);

/// Pack a slice of vertex data into bytes.
pub fn to_bytes<T: VertexData>(data: &[T]) -> Vec<u8> {
    let mut dst = Vec::new();
    for elem in data {
        elem.write(&mut dst);
    }
    dst
}


#[test]
fn test_vec3_packing() {
    let bytes = to_bytes(&[Vec3::new(1.0f32, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
    assert_eq!(bytes.len(), 24);
    assert_eq!(&bytes[12..16], &4.0f32.to_le_bytes());
    assert_eq!(<Vec2<f32> as VertexData>::COMPONENTS, 2);
}
