//! 阶段内进度 → 整体进度
//!
//! 每个阶段占整体进度中的一段 {offset, weight}：导入 0..10，内容 10..40，媒体 40..80，导出 80..100。

use crate::agents::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBand {
    pub offset: u8,
    pub weight: u8,
}

pub fn band(stage: Stage) -> StageBand {
    match stage {
        Stage::Import => StageBand { offset: 0, weight: 10 },
        Stage::Content => StageBand { offset: 10, weight: 30 },
        Stage::Media => StageBand { offset: 40, weight: 40 },
        Stage::Export => StageBand { offset: 80, weight: 20 },
    }
}

/// local 取值 0..=100，越界会被截断；结果总在 [offset, offset + weight] 内
pub fn overall_progress(stage: Stage, local: f64) -> u8 {
    let b = band(stage);
    let local = if local.is_nan() { 0.0 } else { local.clamp(0.0, 100.0) };
    let within = (f64::from(b.weight) * local / 100.0).round() as u8;
    b.offset + within.min(b.weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert_eq!(overall_progress(Stage::Import, 0.0), 0);
        assert_eq!(overall_progress(Stage::Content, 0.0), 10);
        assert_eq!(overall_progress(Stage::Media, 50.0), 60);
        assert_eq!(overall_progress(Stage::Export, 100.0), 100);
    }

    #[test]
    fn test_monotonic_and_bounded() {
        for stage in Stage::ALL {
            let b = band(stage);
            let mut last = 0;
            for local in -20..=140 {
                let p = overall_progress(stage, f64::from(local));
                assert!(p >= b.offset && p <= b.offset + b.weight, "{stage} {local} -> {p}");
                assert!(p >= last);
                last = p;
            }
        }
    }

    #[test]
    fn test_bands_tile_the_range() {
        let mut end = 0;
        for stage in Stage::ALL {
            let b = band(stage);
            assert_eq!(b.offset, end);
            end = b.offset + b.weight;
        }
        assert_eq!(end, 100);
    }
}
