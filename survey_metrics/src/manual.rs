/*!

This is the long-form manual for `survey_metrics` and `surveytab`.

## Study configuration

`surveytab` reads one JSON file describing the study, where its responses
live and which analyses to run. All the keys are in camelCase.

```json
{
  "outputSettings": { "studyName": "Brand tracker", "outputPath": "report.json" },
  "dataSources": [
    { "provider": "csv", "filePath": "responses.csv", "layout": "wide",
      "respondentColumn": 1, "firstDataRow": 2,
      "segmentColumns": ["region", "age_band"], "durationColumn": "duration" }
  ],
  "study": { "name": "Brand tracker", "questions": [], "brandLists": [], "funnels": [] },
  "analyses": { "analyses": [
    { "name": "loyalty", "analysis": { "type": "nps", "question": "Q1" }, "crosstabBy": ["region"] }
  ] },
  "options": { "minBase": 50 }
}
```

The file paths are relative to the configuration file.

### Questions

Every question has an `id` and a `kind`, tagged by `type`:

* `single_choice`, `multi_choice` with `options`
* `matrix` with `rows` and a `scale`
* `scale`, the scale fields inline
* `numeric` with optional `min` and `max`
* `open_ended`
* `ranking` with `items`
* `max_diff_task` with `items` and `itemsPerTask`

A scale has a `construct` (what it measures), a `min` (default 1), a number of
`points`, optional `labels` (one per point) and a `direction`. Two questions
measuring the same construct must use the same scale.

`pipedFrom` names the question whose selections make up the options of this
question, and `displayLogic` restricts a question to the respondents who gave
one of `anyOf` at `question`.

### Funnels

A funnel chains the stages of brand progression, each stage being a
multi-choice question over the brands of `brandList`:

```json
{ "name": "main", "brandList": "brands", "stages": [
  { "name": "aware", "question": "AWARE" },
  { "name": "consider", "question": "CONSIDER" }
] }
```

Every stage must be a subset of the stage before it, respondent by respondent.

## Input formats

The following providers are supported:
* `csv` Comma Separated Values
* `xlsx` Excel workbooks (the first worksheet, or `worksheetName`)
* `json` an array of respondent records

### Layouts

In the `long` layout, every row holds one answer: respondent, question, wave
and answer columns (`respondentColumn`, `questionColumn`, `waveColumn`,
`answerColumn`, 1-based).

In the `wide` layout, every row holds one respondent and every column one
question. The first row holds the question ids. Matrix rows are spread over
columns named `QID[row]`. Columns listed in `segmentColumns` become respondent
attributes and `durationColumn` gives the interview duration in seconds.

### Answer cells

| question kind   | cell                                   |
|-----------------|----------------------------------------|
| scale, numeric  | `7`                                    |
| single choice   | `Brand A`                              |
| multi choice    | `Brand A;Brand C`                      |
| matrix (long)   | `price=4;service=5`                    |
| ranking         | `B;A;C`                                |
| open ended      | any text                               |

An empty cell is a missing answer. A max-diff cell lists every task of the
respondent, separated by `;`. Each task is the items shown separated by `|`,
then the best item and the worst item after a `:`, as in `A|B|C|D:A:D`.

## Analyses

The `type` of an analysis selects its calculator:

* `nps`: Net Promoter Score of a 0-10 question: a scale with `min` 0 and
  11 points, or a numeric question with `min` 0 and `max` 10
* `csat`: top-box and bottom-box percentages and mean of a scale question
* `mean_score`: mean of a scale or numeric question
* `brand_funnel`: stage percentages and conversions of a `funnel`
* `importance_performance`: quadrant placement of paired `importance` and
  `performance` matrices, which must list the same rows in the same order
* `van_westendorp`: price sensitivity from the `tooCheap`, `bargain`,
  `expensive` and `tooExpensive` questions
* `gabor_granger`: demand and revenue from `pricePoints`, each a `price` and a
  purchase-intent `question`
* `max_diff`: counting scores of a best-worst question
* `perceptual_map`: a two-dimensional map of `brandList` from `associations`
  (correspondence analysis) or `ratings` (principal components)

`crosstabBy` lists the respondent attributes to break an analysis down by.
Levels with fewer respondents than `minBase` are suppressed with a warning.
Every pair of reported levels is tested for a significant difference.

## Options

| option                 | default                                      |
|------------------------|----------------------------------------------|
| `npsThresholds`        | detractors 0-6, promoters 9-10               |
| `topBox`               | 2                                            |
| `weighting`            | `unweighted`, or `{"attribute": "weight"}`   |
| `calibration`          | definitely 0.8, probably 0.3, others 0       |
| `ipaSplit`             | `median`, or explicit thresholds             |
| `minBase`              | 30                                           |
| `significanceLevel`    | 0.05                                         |
| `straightlineMinRows`  | 4                                            |
| `speederRatio`         | 0.33 of the median duration                  |

## Errors

A failed analysis is reported in its section with the reason, and the other
analyses are still computed. Errors in the study definition itself (undefined
questions, funnels or brand lists, structural validation errors) fail the
whole report.

*/
