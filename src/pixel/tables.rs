// Integer YUV -> RGB lookup tables
//
// Built once per session and shared read-only between reader threads.

/// Offset applied to a signed channel value before indexing the
/// saturation table
const SAT_OFFSET: i32 = 1024;
const SAT_LEN: usize = 2304;

/// Scale from a byte sample to a normalized float sample
pub const BYTE_TO_FLOAT: f32 = 1.0 / 255.0;

#[derive(Debug, Clone)]
pub struct YuvTables {
    /// Red contribution of V
    pub yur: [i32; 256],
    /// Blue contribution of U
    pub yub: [i32; 256],
    /// Green contribution of U
    pub yugu: [i32; 256],
    /// Green contribution of V
    pub yugv: [i32; 256],
    /// Expanded luma
    pub y: [i32; 256],
    sat: Box<[u8; SAT_LEN]>,
}

impl YuvTables {
    pub fn new() -> Self {
        let mut t = Self {
            yur: [0; 256],
            yub: [0; 256],
            yugu: [0; 256],
            yugv: [0; 256],
            y: [0; 256],
            sat: Box::new([0; SAT_LEN]),
        };

        // Integer division truncates toward zero, matching the reference tables
        for i in 0..256i32 {
            let idx = i as usize;
            t.yur[idx] = 459 * (i - 128) / 256;
            t.yub[idx] = 541 * (i - 128) / 256;
            t.yugu[idx] = -137 * (i - 128) / 256;
            t.yugv[idx] = -55 * (i - 128) / 256;
            t.y[idx] = (i - 16) * 298 / 256;
        }

        for (i, slot) in t.sat.iter_mut().enumerate() {
            let v = i as i32 - SAT_OFFSET;
            *slot = v.clamp(0, 255) as u8;
        }

        t
    }

    /// Clamp a signed channel value into a byte
    #[inline]
    pub fn saturate(&self, value: i32) -> u8 {
        // Channel sums stay within [-247, 546]; anything outside the table
        // would be a table construction bug, so fall back to a plain clamp
        match usize::try_from(value + SAT_OFFSET) {
            Ok(idx) if idx < SAT_LEN => self.sat[idx],
            _ => value.clamp(0, 255) as u8,
        }
    }

    #[inline]
    pub fn red(&self, y: u8, _u: u8, v: u8) -> u8 {
        self.saturate(self.y[y as usize] + self.yur[v as usize])
    }

    #[inline]
    pub fn green(&self, y: u8, u: u8, v: u8) -> u8 {
        self.saturate(self.y[y as usize] + self.yugu[u as usize] + self.yugv[v as usize])
    }

    #[inline]
    pub fn blue(&self, y: u8, u: u8, _v: u8) -> u8 {
        self.saturate(self.y[y as usize] + self.yub[u as usize])
    }
}

impl Default for YuvTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_anchor_values() {
        let t = YuvTables::new();
        assert_eq!(t.y[16], 0);
        assert_eq!(t.y[235], 254);
        assert_eq!(t.yur[128], 0);
        assert_eq!(t.yur[0], -229);
        assert_eq!(t.yub[255], 268);
        assert_eq!(t.yugu[255], -67);
        assert_eq!(t.yugv[0], 27);
    }

    #[test]
    fn saturation_edges() {
        let t = YuvTables::new();
        assert_eq!(t.saturate(-1024), 0);
        assert_eq!(t.saturate(-1), 0);
        assert_eq!(t.saturate(0), 0);
        assert_eq!(t.saturate(200), 200);
        assert_eq!(t.saturate(255), 255);
        assert_eq!(t.saturate(256), 255);
        assert_eq!(t.saturate(1279), 255);
    }

    #[test]
    fn grey_stays_grey() {
        let t = YuvTables::new();
        let (r, g, b) = (t.red(126, 128, 128), t.green(126, 128, 128), t.blue(126, 128, 128));
        assert_eq!((r, g, b), (128, 128, 128));
    }
}
