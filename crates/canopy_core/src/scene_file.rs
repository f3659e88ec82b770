//! Obstacle scene description parser.
//!
//! The scene file is a preprocessed, line-oriented mini-language. Each line
//! holds one directive followed by whitespace-separated numbers:
//!
//! - `triangle x1 y1 z1 x2 y2 z2 x3 y3 z3`
//! - `polygon n x1 y1 z1 ... xn yn zn`
//! - `sphere r`, `cylinder r h`, `cone r1 r2 h`, `prism sx sy sz`, `rectangle w l`
//! - `material top [bottom]`
//! - `pushmatrix`, `popmatrix`
//! - `translate x y z`, `rotate angle ax ay az`, `scale x y z`
//! - `multmatrix m0 ... m15` (column-major)
//!
//! Lines starting with `#` (comments, preprocessor line markers) and blank
//! lines are ignored. Unknown directives and malformed arguments are logged
//! and the line is skipped; only I/O failures abort a load.

use std::path::Path;

use canopy_math::{Mat4, MatrixStack, Vec3};
use thiserror::Error;

use crate::material::{face_pair, DEFAULT_BOTTOM, DEFAULT_TOP, MaterialId};
use crate::primitive::{PrimitiveStore, ShapeParams};

/// Errors that abort a scene load.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problem with a single line; reported and skipped.
#[derive(Error, Debug, PartialEq)]
pub enum LineError {
    #[error("unknown directive '{0}'")]
    UnknownDirective(String),

    #[error("'{directive}' expects {expected} values, got {found}")]
    ArgumentCount {
        directive: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("{0}")]
    Shape(#[from] crate::primitive::ShapeError),
}

/// Outcome of loading a scene.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SceneSummary {
    /// Primitives added to the store
    pub primitives: usize,
    /// Lines that were skipped because of errors
    pub skipped: usize,
}

/// Parser state for one scene load: the matrix stack and current materials.
struct SceneParser<'a> {
    store: &'a mut PrimitiveStore,
    stack: MatrixStack,
    materials: [MaterialId; 2],
    summary: SceneSummary,
}

/// Load a scene file into `store`.
pub fn load_scene<P: AsRef<Path>>(path: P, store: &mut PrimitiveStore) -> Result<SceneSummary, SceneError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let summary = parse_scene(&content, store);
    log::info!(
        "loaded {} obstacle primitives from {} ({} lines skipped)",
        summary.primitives,
        path.display(),
        summary.skipped
    );
    Ok(summary)
}

/// Parse scene text into `store`.
pub fn parse_scene(content: &str, store: &mut PrimitiveStore) -> SceneSummary {
    let mut parser = SceneParser {
        store,
        stack: MatrixStack::new(),
        materials: [DEFAULT_TOP, DEFAULT_BOTTOM],
        summary: SceneSummary::default(),
    };

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Err(e) = parser.parse_line(trimmed) {
            log::warn!("scene line {}: {} (skipped)", i + 1, e);
            parser.summary.skipped += 1;
        }
    }

    if parser.stack.depth() > 1 {
        log::warn!("scene ends with {} unmatched pushmatrix", parser.stack.depth() - 1);
    }
    parser.summary
}

fn parse_numbers(tokens: &[&str]) -> Result<Vec<f32>, LineError> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| LineError::InvalidNumber(t.to_string()))
        })
        .collect()
}

fn expect(directive: &'static str, values: &[f32], expected: usize) -> Result<(), LineError> {
    if values.len() != expected {
        return Err(LineError::ArgumentCount {
            directive,
            expected,
            found: values.len(),
        });
    }
    Ok(())
}

fn vec3(v: &[f32]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

impl SceneParser<'_> {
    fn parse_line(&mut self, line: &str) -> Result<(), LineError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (keyword, rest) = match tokens.split_first() {
            Some((k, rest)) => (*k, rest),
            None => return Ok(()),
        };

        match keyword {
            "pushmatrix" => self.stack.push(),
            "popmatrix" => {
                self.stack.pop();
            }
            "translate" => {
                let v = parse_numbers(rest)?;
                expect("translate", &v, 3)?;
                self.stack.translate(vec3(&v));
            }
            "rotate" => {
                let v = parse_numbers(rest)?;
                expect("rotate", &v, 4)?;
                self.stack.rotate(v[0], vec3(&v[1..]));
            }
            "scale" => {
                let v = parse_numbers(rest)?;
                expect("scale", &v, 3)?;
                self.stack.scale(vec3(&v));
            }
            "multmatrix" => {
                let v = parse_numbers(rest)?;
                expect("multmatrix", &v, 16)?;
                let mut cols = [0.0; 16];
                cols.copy_from_slice(&v);
                self.stack.mult(Mat4::from_cols_array(&cols));
            }
            "material" => {
                let v = parse_numbers(rest)?;
                if v.is_empty() || v.len() > 2 {
                    return Err(LineError::ArgumentCount {
                        directive: "material",
                        expected: 2,
                        found: v.len(),
                    });
                }
                let index = |x: f32| x.max(0.0) as MaterialId;
                self.materials = face_pair(index(v[0]), v.get(1).copied().map(index));
            }
            "triangle" => {
                let v = parse_numbers(rest)?;
                expect("triangle", &v, 9)?;
                self.add(ShapeParams::Triangle([vec3(&v[0..3]), vec3(&v[3..6]), vec3(&v[6..9])]))?;
            }
            "polygon" => {
                let v = parse_numbers(rest)?;
                let count = v.first().map(|&n| n.max(0.0) as usize).unwrap_or(0);
                expect("polygon", &v, 1 + 3 * count)?;
                let vertices = v[1..].chunks_exact(3).map(vec3).collect();
                self.add(ShapeParams::Polygon(vertices))?;
            }
            "sphere" => {
                let v = parse_numbers(rest)?;
                expect("sphere", &v, 1)?;
                self.add(ShapeParams::Sphere { radius: v[0] })?;
            }
            "cylinder" => {
                let v = parse_numbers(rest)?;
                expect("cylinder", &v, 2)?;
                self.add(ShapeParams::Cylinder {
                    radius: v[0],
                    height: v[1],
                })?;
            }
            "cone" => {
                let v = parse_numbers(rest)?;
                expect("cone", &v, 3)?;
                self.add(ShapeParams::Cone {
                    base_radius: v[0],
                    top_radius: v[1],
                    height: v[2],
                })?;
            }
            "prism" => {
                let v = parse_numbers(rest)?;
                expect("prism", &v, 3)?;
                self.add(ShapeParams::Prism { size: vec3(&v) })?;
            }
            "rectangle" => {
                let v = parse_numbers(rest)?;
                expect("rectangle", &v, 2)?;
                self.add(ShapeParams::Rectangle {
                    width: v[0],
                    length: v[1],
                })?;
            }
            other => return Err(LineError::UnknownDirective(other.to_string())),
        }
        Ok(())
    }

    fn add(&mut self, params: ShapeParams) -> Result<(), LineError> {
        self.store
            .add(params, &self.stack.current(), self.materials, None)?;
        self.summary.primitives += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Shape;

    #[test]
    fn test_parse_transformed_primitives() {
        let scene = "\
# obstacles
pushmatrix
translate 0 2 0
sphere 0.5
popmatrix
triangle -1 0 -1  -1 0 1  1 0 1
";
        let mut store = PrimitiveStore::new();
        let summary = parse_scene(scene, &mut store);

        assert_eq!(summary, SceneSummary { primitives: 2, skipped: 0 });
        let sphere = store.get(0).unwrap();
        assert!((sphere.bbox.centroid() - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
        // popmatrix restored identity for the triangle
        assert!(store.get(1).unwrap().bbox.y.contains(0.0));
    }

    #[test]
    fn test_unknown_directive_skipped() {
        let scene = "teapot 1 2 3\nsphere 1\n";
        let mut store = PrimitiveStore::new();
        let summary = parse_scene(scene, &mut store);

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.primitives, 1);
    }

    #[test]
    fn test_bad_arguments_skipped() {
        let scene = "translate 1 2\nsphere abc\npolygon 4 0 0 0 1 0 0 1 1 0\ncylinder 0.1 1\n";
        let mut store = PrimitiveStore::new();
        let summary = parse_scene(scene, &mut store);

        assert_eq!(summary.skipped, 3);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get(0).unwrap().shape, Shape::Cylinder { .. }));
    }

    #[test]
    fn test_material_directive() {
        let scene = "material 2\nrectangle 1 1\nmaterial 3 4\nrectangle 1 1\n";
        let mut store = PrimitiveStore::new();
        parse_scene(scene, &mut store);

        assert_eq!(store.get(0).unwrap().materials, [2, 2]);
        assert_eq!(store.get(1).unwrap().materials, [3, 4]);
    }

    #[test]
    fn test_polygon_directive() {
        let scene = "polygon 4  0 0 0  0 0 1  1 0 1  1 0 0\n";
        let mut store = PrimitiveStore::new();
        parse_scene(scene, &mut store);

        match &store.get(0).unwrap().shape {
            Shape::Polygon(p) => assert_eq!(p.vertices.len(), 4),
            other => panic!("expected polygon, got {}", other.kind()),
        }
    }

    #[test]
    fn test_multmatrix_is_column_major() {
        let scene = "multmatrix 1 0 0 0  0 1 0 0  0 0 1 0  3 0 0 1\nsphere 1\n";
        let mut store = PrimitiveStore::new();
        parse_scene(scene, &mut store);

        let c = store.get(0).unwrap().bbox.centroid();
        assert!((c - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_demo_stake_stands_upright() {
        let mut store = PrimitiveStore::new();
        let summary = parse_scene(include_str!("../../../demos/stake.scene"), &mut store);
        assert_eq!(summary, SceneSummary { primitives: 2, skipped: 0 });

        let stake = store.get(0).unwrap();
        assert!(matches!(stake.shape, Shape::Cylinder { .. }));
        assert!((stake.bbox.y.size() - 1.2).abs() < 1e-3, "height {}", stake.bbox.y.size());
        assert!(stake.bbox.x.size() < 0.1);
        assert!(stake.bbox.z.size() < 0.1);
    }

    #[test]
    fn test_unbalanced_popmatrix_is_harmless() {
        let scene = "popmatrix\nsphere 1\n";
        let mut store = PrimitiveStore::new();
        let summary = parse_scene(scene, &mut store);
        assert_eq!(summary.skipped, 0);
        assert_eq!(store.len(), 1);
    }
}
