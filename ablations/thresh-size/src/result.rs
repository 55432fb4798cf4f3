//! 实验结果.

use crate::profile::Profile;
use patch_berry::binarize::SearchResult;
use std::io::{self, Write};

/// 排名时使用的指标.
const RANK_METRIC: &str = "dsc";

/// 最多展示的格子个数.
const TOP_K: usize = 5;

/// 将 `profile` 与 `res` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &Profile, res: &SearchResult, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Strategy `{name}`:")?;
    writeln!(w, "{S4}Evaluated samples: {}", p.samples())?;
    writeln!(w, "{S4}Grid cells: {}", p.cells())?;
    writeln!(w, "{S4}Total time: {} ms", p.total_ms())?;
    writeln!(
        w,
        "{S4}Average time: {} ms per sample",
        f64_to_display(p.avg_sample_ms())
    )?;
    write!(w, "{S4}Top {TOP_K} cells by `{RANK_METRIC}`:")?;
    for (m, label) in res.ranked(RANK_METRIC).into_iter().take(TOP_K) {
        write!(
            w,
            "\n{S4}{S4}{label}: {} ± {} (n = {})",
            f64_to_display(m.mean(RANK_METRIC)),
            f64_to_display(m.std(RANK_METRIC)),
            m.count()
        )?;
    }
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<(&'static str, (Profile, SearchResult))>,
}

impl AblationResult {
    pub fn new<I: IntoIterator<Item = (&'static str, (Profile, SearchResult))>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 所有策略的搜索结果是否完全一致.
    pub fn consistent(&self) -> bool {
        self.data.windows(2).all(|w| w[0].1 .1 == w[1].1 .1)
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, (profile, res)) in self.data.iter() {
            describe_into(key, profile, res, &mut buf).unwrap();
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
        println!("Strategies agree: {}", self.consistent());
    }
}
