//! Three-component unsigned index, used throughout for group/invocation
//! coordinates (global id, local id, workgroup id, group counts).
use std::fmt;
use std::ops::{Add, Mul};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}
impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Dim3 { Dim3 { x, y, z } }
    pub fn product(&self) -> u64 { self.x as u64 * self.y as u64 * self.z as u64 }
    pub fn as_array(&self) -> [u32; 3] { [self.x, self.y, self.z] }
    pub fn as_tuple(&self) -> (u32, u32, u32) { (self.x, self.y, self.z) }
}
impl Add for Dim3 {
    type Output = Dim3;
    fn add(self, rhs: Dim3) -> Dim3 { Dim3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z) }
}
impl Mul for Dim3 {
    type Output = Dim3;
    fn mul(self, rhs: Dim3) -> Dim3 { Dim3::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z) }
}
impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Enumerate every coordinate in `[0, dims)` in x-fastest, y-middle,
/// z-major lexical order (workgroup construction, dispatch
/// enumeration).
pub fn enumerate(dims: Dim3) -> impl Iterator<Item = Dim3> {
    (0..dims.z).flat_map(move |z| {
        (0..dims.y).flat_map(move |y| (0..dims.x).map(move |x| Dim3::new(x, y, z)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_is_x_fastest() {
        let v: Vec<_> = enumerate(Dim3::new(2, 2, 1)).collect();
        assert_eq!(v, vec![
            Dim3::new(0, 0, 0), Dim3::new(1, 0, 0),
            Dim3::new(0, 1, 0), Dim3::new(1, 1, 0),
        ]);
    }

    #[test]
    fn global_id_formula() {
        let local = Dim3::new(1, 0, 0);
        let group = Dim3::new(2, 0, 0);
        let size = Dim3::new(4, 1, 1);
        assert_eq!(local + group * size, Dim3::new(9, 0, 0));
    }
}
